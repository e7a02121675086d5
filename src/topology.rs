// Copyright (c) 2025, The Metapipe Authors
// MIT License
// All rights reserved.

//! # Queue Topology
//!
//! Declares the queues a service depends on. Every consumed queue and its
//! dead-letter queue are declared durable before first use; declaration is
//! idempotent and safe to repeat concurrently from multiple processes, so no
//! coordination is needed between the services sharing a queue.

use crate::{errors::AmqpError, queue::QueueDefinition};
use lapin::{options::QueueDeclareOptions, types::FieldTable, Channel};
use std::sync::Arc;
use tracing::{debug, error};

/// Collects queue definitions and installs them on the broker.
pub struct AmqpTopology<'tp> {
    channel: Arc<Channel>,
    queues: Vec<&'tp QueueDefinition>,
}

impl<'tp> AmqpTopology<'tp> {
    pub fn new(channel: Arc<Channel>) -> AmqpTopology<'tp> {
        AmqpTopology {
            channel,
            queues: vec![],
        }
    }

    /// Adds a queue definition to the topology.
    pub fn queue(mut self, def: &'tp QueueDefinition) -> Self {
        self.queues.push(def);
        self
    }

    /// Declares every registered queue together with its dead-letter queue.
    pub async fn install(&self) -> Result<(), AmqpError> {
        for def in &self.queues {
            install_queue(&self.channel, def).await?;
        }
        Ok(())
    }
}

/// Declares a queue and its dead-letter queue, both durable.
pub(crate) async fn install_queue(
    channel: &Channel,
    def: &QueueDefinition,
) -> Result<(), AmqpError> {
    declare_queue(channel, def.name(), def.durable).await?;
    declare_queue(channel, def.dlq_name(), def.durable).await
}

/// Declares a single durable queue, created if absent.
pub(crate) async fn declare_durable_queue(channel: &Channel, name: &str) -> Result<(), AmqpError> {
    declare_queue(channel, name, true).await
}

async fn declare_queue(channel: &Channel, name: &str, durable: bool) -> Result<(), AmqpError> {
    debug!("declaring queue: {}", name);

    match channel
        .queue_declare(
            name,
            QueueDeclareOptions {
                passive: false,
                durable,
                exclusive: false,
                auto_delete: false,
                nowait: false,
            },
            FieldTable::default(),
        )
        .await
    {
        Err(err) => {
            error!(error = err.to_string(), name, "error to declare the queue");
            Err(AmqpError::DeclareQueueError(name.to_owned()))
        }
        _ => {
            debug!("queue: {} was declared", name);
            Ok(())
        }
    }
}
