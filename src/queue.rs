// Copyright (c) 2025, The Metapipe Authors
// MIT License
// All rights reserved.

//! # Queue Definitions
//!
//! Builder-style definitions for the queues a service consumes from or
//! publishes to. A definition carries the queue name, its durability flag
//! and the retry/DLQ settings consulted by the delivery loop.

/// Default number of delivery attempts before a message is dead-lettered.
pub const DEFAULT_MAX_RETRIES: i64 = 3;

/// Suffix appended to a queue name to derive its dead-letter queue.
pub const DLQ_SUFFIX: &str = ".dlq";

/// Definition of a RabbitMQ queue with its delivery settings.
///
/// The builder starts from a durable queue with the default retry budget and
/// a dead-letter queue named `<name>.dlq`; both can be overridden.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueDefinition {
    pub(crate) name: String,
    pub(crate) durable: bool,
    pub(crate) dlq_name: String,
    pub(crate) max_retries: i64,
}

impl QueueDefinition {
    /// Creates a new durable queue definition with the given name.
    pub fn new(name: &str) -> QueueDefinition {
        QueueDefinition {
            name: name.to_owned(),
            durable: true,
            dlq_name: format!("{name}{DLQ_SUFFIX}"),
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    /// Marks the queue as non-durable. Intended for ephemeral queues in
    /// development setups; production queues stay durable.
    pub fn transient(mut self) -> Self {
        self.durable = false;
        self
    }

    /// Overrides the dead-letter queue name.
    pub fn with_dlq(mut self, dlq_name: &str) -> Self {
        self.dlq_name = dlq_name.to_owned();
        self
    }

    /// Overrides the retry budget consulted by the delivery loop.
    pub fn with_max_retries(mut self, max_retries: i64) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// The queue name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The dead-letter queue name.
    pub fn dlq_name(&self) -> &str {
        &self.dlq_name
    }

    /// The configured retry budget.
    pub fn max_retries(&self) -> i64 {
        self.max_retries
    }
}
