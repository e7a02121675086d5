// Copyright (c) 2025, The Metapipe Authors
// MIT License
// All rights reserved.

//! # Queue Consumers
//!
//! This module wires queues to handlers and runs the delivery loop workers.
//! Each registered queue gets one dedicated tokio worker that consumes with
//! manual acknowledgement, strictly one delivery at a time; throughput scales
//! by adding queues, never by reordering within one. Workers are spawned
//! explicitly and tracked by a [`ConsumerHandle`] supporting graceful
//! shutdown: the worker stops taking new deliveries, lets the in-flight one
//! settle, then exits. A lost subscription is reconnected after a fixed delay
//! rather than crashing the process.

use crate::{
    consumer::consume,
    errors::AmqpError,
    handler::ConsumerHandler,
    queue::QueueDefinition,
    retry::RetryPolicy,
    topology,
};
use futures_util::{future::join_all, StreamExt};
use lapin::{options::BasicConsumeOptions, types::FieldTable, Channel};
use opentelemetry::global;
use serde::de::DeserializeOwned;
use std::{sync::Arc, time::Duration};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};
use uuid::Uuid;

/// Delay before re-creating a lost or failed subscription.
const RECONNECT_DELAY: Duration = Duration::from_secs(5);

struct Registration<T> {
    queue_def: QueueDefinition,
    handler: Arc<dyn ConsumerHandler<T>>,
}

/// Consumes registered queues, dispatching each delivery to its handler.
pub struct AmqpDispatcher<T> {
    channel: Arc<Channel>,
    registrations: Vec<Registration<T>>,
}

impl<T> AmqpDispatcher<T>
where
    T: DeserializeOwned + Send + Sync + 'static,
{
    pub fn new(channel: Arc<Channel>) -> Self {
        AmqpDispatcher {
            channel,
            registrations: vec![],
        }
    }

    /// Registers a handler for a queue. Returns self for chaining.
    pub fn register(mut self, def: &QueueDefinition, handler: Arc<dyn ConsumerHandler<T>>) -> Self {
        self.registrations.push(Registration {
            queue_def: def.clone(),
            handler,
        });
        self
    }

    /// Spawns one worker per registered queue and returns their handles.
    pub fn spawn(&self) -> Vec<ConsumerHandle> {
        self.registrations
            .iter()
            .map(|reg| {
                let (tx, rx) = watch::channel(false);
                let task = tokio::spawn(run_worker(
                    self.channel.clone(),
                    reg.queue_def.clone(),
                    reg.handler.clone(),
                    rx,
                ));
                ConsumerHandle {
                    queue: reg.queue_def.name().to_owned(),
                    shutdown: tx,
                    task,
                }
            })
            .collect()
    }

    /// Spawns all workers and blocks until every one of them exits. The
    /// shutdown senders must outlive the join: dropping one closes the watch
    /// channel, which its worker treats as a shutdown request.
    pub async fn consume_blocking(&self) -> Result<(), AmqpError> {
        let handles = self.spawn();
        let (senders, tasks): (Vec<_>, Vec<_>) = handles
            .into_iter()
            .map(|handle| (handle.shutdown, handle.task))
            .unzip();

        let joined = join_all(tasks).await;
        drop(senders);

        for result in joined {
            if result.is_err() {
                error!("consumer worker panicked");
                return Err(AmqpError::InternalError);
            }
        }

        Ok(())
    }
}

/// Handle to a running delivery-loop worker.
pub struct ConsumerHandle {
    queue: String,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl ConsumerHandle {
    /// The queue this worker consumes.
    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// Requests a graceful stop and waits for the worker to finish settling
    /// its in-flight delivery.
    pub async fn shutdown(self) {
        debug!(queue = self.queue, "shutting down consumer worker");
        let _ = self.shutdown.send(true);
        if self.task.await.is_err() {
            error!(queue = self.queue, "consumer worker panicked during shutdown");
        }
    }
}

async fn run_worker<T>(
    channel: Arc<Channel>,
    def: QueueDefinition,
    handler: Arc<dyn ConsumerHandler<T>>,
    mut shutdown: watch::Receiver<bool>,
) where
    T: DeserializeOwned + Send + Sync + 'static,
{
    let policy = RetryPolicy::new(&def);
    let tracer = global::tracer("amqp consumer");
    let consumer_tag = format!("{}-{}", def.name(), Uuid::new_v4());

    while !*shutdown.borrow() {
        if let Err(err) = topology::install_queue(&channel, &def).await {
            error!(
                error = err.to_string(),
                queue = def.name(),
                "error declaring queues, retrying"
            );
            if wait_or_shutdown(&mut shutdown).await {
                break;
            }
            continue;
        }

        let mut consumer = match channel
            .basic_consume(
                def.name(),
                &consumer_tag,
                BasicConsumeOptions {
                    no_local: false,
                    no_ack: false,
                    exclusive: false,
                    nowait: false,
                },
                FieldTable::default(),
            )
            .await
        {
            Ok(c) => c,
            Err(err) => {
                error!(
                    error = err.to_string(),
                    queue = def.name(),
                    "error to create the consumer, retrying"
                );
                if wait_or_shutdown(&mut shutdown).await {
                    break;
                }
                continue;
            }
        };

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    // A closed channel means every handle is gone; stop
                    // rather than spin on the always-ready branch.
                    if changed.is_err() || *shutdown.borrow() {
                        debug!(queue = def.name(), "consumer worker stopping");
                        return;
                    }
                }
                next = consumer.next() => match next {
                    Some(Ok(delivery)) => {
                        if let Err(err) =
                            consume(&tracer, &delivery, &policy, &handler, channel.clone()).await
                        {
                            error!(error = err.to_string(), "error consume msg");
                        }
                    }
                    Some(Err(err)) => {
                        error!(
                            error = err.to_string(),
                            queue = def.name(),
                            "subscription error, reconnecting"
                        );
                        break;
                    }
                    None => {
                        warn!(queue = def.name(), "subscription closed, reconnecting");
                        break;
                    }
                }
            }
        }

        if wait_or_shutdown(&mut shutdown).await {
            break;
        }
    }

    debug!(queue = def.name(), "consumer worker stopped");
}

/// Sleeps the reconnect delay, returning early with `true` if shutdown was
/// requested in the meantime. A closed shutdown channel counts as a shutdown
/// request, so the delay is never bypassed by a dropped sender.
async fn wait_or_shutdown(shutdown: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(RECONNECT_DELAY) => false,
        changed = shutdown.changed() => changed.is_err() || *shutdown.borrow(),
    }
}
