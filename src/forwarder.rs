// Copyright (c) 2025, The Metapipe Authors
// MIT License
// All rights reserved.

//! # Forwarding Dispatcher
//!
//! Applies a resolver's decision to a message: publish to each destination
//! queue in order, or drop. There is no cross-queue transaction, so each
//! publish is independent and a failure on one destination does not prevent
//! attempting the next; the outcome is reported per destination. Forwarded and
//! dropped outcomes are observable only through structured log events, the
//! pipeline is fire-and-forget by design.

use crate::{
    errors::{AmqpError, HandlerError},
    handler::ConsumerHandler,
    message,
    message::MessageId,
    publisher::{HeaderValue, Publisher},
    resolver::Resolver,
};
use async_trait::async_trait;
use opentelemetry::Context;
use serde::Serialize;
use std::{collections::HashMap, sync::Arc};
use tracing::{error, info};

/// Per-destination outcome of one dispatch.
#[derive(Debug, Default)]
pub struct DispatchReport {
    /// Destinations the message was published to.
    pub forwarded: Vec<String>,
    /// Destinations where publishing failed, with the failure.
    pub failed: Vec<(String, AmqpError)>,
}

impl DispatchReport {
    /// True when the resolver decided to drop the message.
    pub fn dropped(&self) -> bool {
        self.forwarded.is_empty() && self.failed.is_empty()
    }
}

/// Forwards messages from one queue to the queues a resolver selects.
pub struct ForwardingDispatcher<T> {
    resolver: Arc<dyn Resolver<T>>,
    publisher: Arc<dyn Publisher>,
}

impl<T> ForwardingDispatcher<T>
where
    T: Serialize + MessageId + Send + Sync,
{
    pub fn new(resolver: Arc<dyn Resolver<T>>, publisher: Arc<dyn Publisher>) -> Self {
        ForwardingDispatcher {
            resolver,
            publisher,
        }
    }

    /// Resolves the message and publishes it unchanged to every destination,
    /// in decision order. Reports exactly one outcome per destination, or a
    /// single drop when the decision is empty.
    pub async fn dispatch(&self, ctx: &Context, message: &T) -> Result<DispatchReport, AmqpError> {
        let destinations = self.resolver.resolve(message);
        if destinations.is_empty() {
            info!(message_id = message.message_id(), "dropped message");
            return Ok(DispatchReport::default());
        }

        let payload = message::encode(message)?;
        let headers = HashMap::<String, HeaderValue>::new();

        let mut report = DispatchReport::default();
        for destination in destinations {
            match self
                .publisher
                .publish(ctx, &destination, &payload, &headers)
                .await
            {
                Ok(()) => {
                    info!(
                        message_id = message.message_id(),
                        queue = destination,
                        "forwarded message"
                    );
                    report.forwarded.push(destination);
                }
                Err(err) => {
                    error!(
                        error = err.to_string(),
                        message_id = message.message_id(),
                        queue = destination,
                        "error forwarding message"
                    );
                    report.failed.push((destination, err));
                }
            }
        }

        Ok(report)
    }
}

/// Lets a forwarding dispatcher sit directly behind a delivery loop: any
/// destination failure fails the delivery so it goes through the retry/DLQ
/// policy. A retried delivery may re-publish to destinations that already
/// succeeded; downstream consumers see at-least-once delivery.
#[async_trait]
impl<T> ConsumerHandler<T> for ForwardingDispatcher<T>
where
    T: Serialize + MessageId + Send + Sync,
{
    async fn handle(&self, ctx: &Context, message: &T) -> Result<(), HandlerError> {
        let report = self
            .dispatch(ctx, message)
            .await
            .map_err(|err| HandlerError::new(err.to_string()))?;

        if report.failed.is_empty() {
            Ok(())
        } else {
            Err(HandlerError::new(format!(
                "failed forwarding to {} destination(s)",
                report.failed.len()
            )))
        }
    }
}
