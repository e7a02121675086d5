// Copyright (c) 2025, The Metapipe Authors
// MIT License
// All rights reserved.

mod consumer;
mod otel;

pub mod channel;
pub mod config;
pub mod dispatcher;
pub mod errors;
pub mod forwarder;
pub mod handler;
pub mod message;
pub mod publisher;
pub mod queue;
pub mod resolver;
pub mod retry;
pub mod topology;
