// Copyright (c) 2025, The Metapipe Authors
// MIT License
// All rights reserved.

//! # Message Publisher
//!
//! Publishing side of the transport. Messages go to the default exchange with
//! the destination queue name as routing key, carrying a JSON content type, a
//! fresh message id and the caller's headers, with the current trace context
//! injected for propagation. Destination queues are declared durable on first
//! use, lazily and idempotently, so either side of a queue may come up first.

use crate::{errors::AmqpError, otel::AmqpTracePropagator, topology};
use async_trait::async_trait;
use lapin::{
    options::BasicPublishOptions,
    types::{AMQPValue, FieldTable, LongLongInt, LongString, ShortString},
    BasicProperties, Channel,
};
use opentelemetry::{global, Context};
use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
};
use tokio::sync::Mutex;
use tracing::error;
use uuid::Uuid;

/// Content type stamped on every published message.
pub const JSON_CONTENT_TYPE: &str = "application/json";

/// Header values supported on published messages.
#[derive(Debug, Clone, PartialEq)]
pub enum HeaderValue {
    Str(String),
    Int(i64),
}

/// Publishes a raw payload to a named queue.
///
/// The trait seam exists so the forwarding dispatcher and application code can
/// be exercised against a test double without a broker.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(
        &self,
        ctx: &Context,
        queue: &str,
        payload: &[u8],
        headers: &HashMap<String, HeaderValue>,
    ) -> Result<(), AmqpError>;
}

/// RabbitMQ implementation of the [`Publisher`] trait.
pub struct AmqpPublisher {
    channel: Arc<Channel>,
    declared: Mutex<std::collections::HashSet<String>>,
}

impl AmqpPublisher {
    pub fn new(channel: Arc<Channel>) -> Arc<AmqpPublisher> {
        Arc::new(AmqpPublisher {
            channel,
            declared: Mutex::new(std::collections::HashSet::new()),
        })
    }

    /// Declares the destination queue on first publish to it. Declaration is
    /// idempotent on the broker side, the local set only skips the round trip.
    async fn ensure_queue(&self, queue: &str) -> Result<(), AmqpError> {
        let mut declared = self.declared.lock().await;
        if declared.contains(queue) {
            return Ok(());
        }
        topology::declare_durable_queue(&self.channel, queue).await?;
        declared.insert(queue.to_owned());
        Ok(())
    }
}

#[async_trait]
impl Publisher for AmqpPublisher {
    async fn publish(
        &self,
        ctx: &Context,
        queue: &str,
        payload: &[u8],
        headers: &HashMap<String, HeaderValue>,
    ) -> Result<(), AmqpError> {
        self.ensure_queue(queue).await?;

        let mut btree = BTreeMap::<ShortString, AMQPValue>::default();

        global::get_text_map_propagator(|propagator| {
            propagator.inject_context(ctx, &mut AmqpTracePropagator::new(&mut btree))
        });

        for (key, value) in headers {
            let amqp_value = match value {
                HeaderValue::Str(v) => AMQPValue::LongString(LongString::from(v.as_str())),
                HeaderValue::Int(v) => AMQPValue::LongLongInt(LongLongInt::from(*v)),
            };
            btree.insert(ShortString::from(key.as_str()), amqp_value);
        }

        match self
            .channel
            .basic_publish(
                "",
                queue,
                BasicPublishOptions {
                    immediate: false,
                    mandatory: false,
                },
                payload,
                BasicProperties::default()
                    .with_content_type(ShortString::from(JSON_CONTENT_TYPE))
                    .with_message_id(ShortString::from(Uuid::new_v4().to_string()))
                    .with_headers(FieldTable::from(btree)),
            )
            .await
        {
            Err(err) => {
                error!(error = err.to_string(), queue, "error publishing message");
                Err(AmqpError::PublishingError(queue.to_owned()))
            }
            _ => Ok(()),
        }
    }
}
