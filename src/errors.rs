// Copyright (c) 2025, The Metapipe Authors
// MIT License
// All rights reserved.

//! # Error Types for the AMQP Delivery Layer
//!
//! This module provides the error types used across the crate. The `AmqpError`
//! enum covers connection, channel, queue declaration, publishing, consuming
//! and acknowledgement failures, plus the decode errors raised by the message
//! codec. Decode errors are a distinct kind from transport errors so that
//! callers can tell a malformed payload apart from a broker failure.

use thiserror::Error;

/// Represents errors that can occur during AMQP/RabbitMQ operations.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum AmqpError {
    /// Internal errors that don't fit into other categories
    #[error("internal error")]
    InternalError,

    /// Invalid or incomplete broker configuration, detected at startup
    #[error("invalid configuration `{0}`")]
    ConfigError(String),

    /// Error establishing a connection to the RabbitMQ server
    #[error("failure to connect")]
    ConnectionError,

    /// Error creating a channel from an established connection
    #[error("failure to create a channel")]
    ChannelError,

    /// Error declaring a queue with the given name
    #[error("failure to declare a queue `{0}`")]
    DeclareQueueError(String),

    /// Error publishing a message to the given queue
    #[error("failure to publish to `{0}`")]
    PublishingError(String),

    /// Payload does not decode into the expected typed message
    #[error("failure to decode payload: {0}")]
    DecodeError(String),

    /// Error acknowledging a delivery
    #[error("failure to ack message")]
    AckMessageError,

    /// Error republishing a delivery back to its original queue
    #[error("failure to requeue message")]
    RequeuingMessageError,

    /// Error publishing a message to the Dead Letter Queue (DLQ)
    #[error("failure to publish to dlq")]
    PublishingToDlqError,

    /// Error consuming a message
    #[error("failure to consume message `{0}`")]
    ConsumerError(String),
}

/// Failure signaled by an application handler while processing a decoded
/// message. The delivery loop never inspects the reason beyond logging it;
/// any handler error routes the delivery through the retry/DLQ policy.
#[derive(Error, Debug)]
#[error("handler error: {0}")]
pub struct HandlerError(pub String);

impl HandlerError {
    pub fn new(reason: impl Into<String>) -> Self {
        HandlerError(reason.into())
    }
}
