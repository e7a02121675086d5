// Copyright (c) 2025, The Metapipe Authors
// MIT License
// All rights reserved.

//! # Message Resolvers
//!
//! A resolver decides, per message, where it should be re-published. The
//! decision is pure: computed from the message's fields and configuration
//! fixed at startup, never from broker state. Resolvers are total over
//! well-formed messages; an empty decision means drop. New variants slot in
//! without changes to the forwarding dispatcher.

use crate::message::VideoMetadata;
use std::collections::{HashMap, HashSet};

/// Maps a message to the ordered list of queues it should be forwarded to.
/// An empty list means the message is dropped.
pub trait Resolver<T>: Send + Sync {
    fn resolve(&self, message: &T) -> Vec<String>;
}

/// Allow-list resolver: messages whose `video_id` is in the configured set
/// forward to one fixed destination queue, everything else is dropped.
pub struct VideoIdResolver {
    allowed: HashSet<String>,
    destination: String,
}

impl VideoIdResolver {
    pub fn new<I, S>(allowed: I, destination: &str) -> VideoIdResolver
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        VideoIdResolver {
            allowed: allowed.into_iter().map(Into::into).collect(),
            destination: destination.to_owned(),
        }
    }
}

impl Resolver<VideoMetadata> for VideoIdResolver {
    fn resolve(&self, message: &VideoMetadata) -> Vec<String> {
        if self.allowed.contains(&message.video_id) {
            vec![self.destination.clone()]
        } else {
            vec![]
        }
    }
}

/// Routing-table resolver: maps a `video_id` to an explicit destination list,
/// supporting fan-out to several queues per id.
pub struct RouteMapResolver {
    routes: HashMap<String, Vec<String>>,
}

impl RouteMapResolver {
    pub fn new(routes: HashMap<String, Vec<String>>) -> RouteMapResolver {
        RouteMapResolver { routes }
    }
}

impl Resolver<VideoMetadata> for RouteMapResolver {
    fn resolve(&self, message: &VideoMetadata) -> Vec<String> {
        self.routes
            .get(&message.video_id)
            .cloned()
            .unwrap_or_default()
    }
}
