// Copyright (c) 2025, The Metapipe Authors
// MIT License
// All rights reserved.

//! # Consumer Handler Contract
//!
//! Application code plugs into the delivery loop through [`ConsumerHandler`].
//! A handler receives one decoded message per invocation and signals failure
//! by returning an error; the delivery loop owns acknowledgement and routes
//! failures through the retry/DLQ policy, so handlers never touch the broker.

use crate::errors::HandlerError;
use async_trait::async_trait;
use opentelemetry::Context;

/// Processes one decoded message.
///
/// Returning `Ok(())` acknowledges the delivery; returning an error sends it
/// through the retry/dead-letter policy. The loop processes one delivery at a
/// time per queue, so a slow handler stalls only its own queue. No timeout is
/// imposed here; callers needing one wrap their handler in `tokio::time::timeout`.
#[async_trait]
pub trait ConsumerHandler<T>: Send + Sync {
    async fn handle(&self, ctx: &Context, message: &T) -> Result<(), HandlerError>;
}
