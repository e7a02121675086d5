// Copyright (c) 2025, The Metapipe Authors
// MIT License
// All rights reserved.

//! # Delivery Processing
//!
//! Core of the delivery loop: each received delivery is decoded, handed to
//! the registered handler and then settled. Exactly one of acknowledge,
//! retry-republish or dead-letter-republish happens per delivery, and the
//! original delivery is always acknowledged after a successful republish (the
//! republished message is a new, independent delivery). A decode failure takes
//! the same retry/DLQ path as a handler failure so a poisoned payload cannot
//! circulate forever.

use crate::{
    errors::AmqpError,
    handler::ConsumerHandler,
    message, otel,
    retry::{RetryPolicy, RetryTarget, RETRY_COUNT_HEADER},
};
use lapin::{
    message::Delivery,
    options::{BasicAckOptions, BasicPublishOptions},
    protocol::basic::AMQPProperties,
    types::{AMQPValue, FieldTable, ShortString},
    Channel,
};
use opentelemetry::{
    global::{BoxedSpan, BoxedTracer},
    trace::{Span, Status},
};
use serde::de::DeserializeOwned;
use std::{borrow::Cow, sync::Arc};
use tracing::{debug, error, warn};

/// Processes one delivery end to end: decode, handle, settle.
pub(crate) async fn consume<T>(
    tracer: &BoxedTracer,
    delivery: &Delivery,
    policy: &RetryPolicy,
    handler: &Arc<dyn ConsumerHandler<T>>,
    channel: Arc<Channel>,
) -> Result<(), AmqpError>
where
    T: DeserializeOwned + Send + Sync,
{
    let attempt_count = extract_retry_count(&delivery.properties);

    let (ctx, mut span) = otel::consumer_span(
        &delivery.properties,
        tracer,
        delivery.routing_key.as_str(),
    );

    debug!(
        queue = delivery.routing_key.as_str(),
        attempt = attempt_count,
        "received delivery"
    );

    let outcome = process_payload(&delivery.data, &ctx, handler).await;

    match outcome {
        Ok(()) => {
            debug!("message successfully processed");
            match delivery.ack(BasicAckOptions { multiple: false }).await {
                Err(err) => {
                    error!("error whiling ack msg");
                    span.record_error(&err);
                    span.set_status(Status::Error {
                        description: Cow::from("error to ack msg"),
                    });
                    Err(AmqpError::AckMessageError)
                }
                _ => {
                    span.set_status(Status::Ok);
                    Ok(())
                }
            }
        }
        Err(err) => {
            warn!(error = err.to_string(), "failure processing delivery");
            span.record_error(&err);
            settle_failure(delivery, policy, attempt_count, &mut span, channel).await
        }
    }
}

/// Decodes a payload and hands it to the handler. A malformed payload yields
/// a decode error here and is settled exactly like a handler failure; it is
/// never silently dropped or acknowledged as processed.
pub(crate) async fn process_payload<T>(
    payload: &[u8],
    ctx: &opentelemetry::Context,
    handler: &Arc<dyn ConsumerHandler<T>>,
) -> Result<(), AmqpError>
where
    T: DeserializeOwned + Send + Sync,
{
    match message::decode::<T>(payload) {
        Ok(msg) => handler
            .handle(ctx, &msg)
            .await
            .map_err(|err| AmqpError::ConsumerError(err.to_string())),
        Err(err) => Err(err),
    }
}

/// Settles a failed delivery: republish per the retry/DLQ policy, then ack
/// the original. If the republish fails the delivery is left unacknowledged
/// so the broker redelivers it.
async fn settle_failure(
    delivery: &Delivery,
    policy: &RetryPolicy,
    attempt_count: i64,
    span: &mut BoxedSpan,
    channel: Arc<Channel>,
) -> Result<(), AmqpError> {
    let decision = policy.decide(attempt_count);
    let destination = policy.destination(&decision);

    match decision.target {
        RetryTarget::Requeue => warn!(
            queue = destination,
            attempt = decision.attempt_count,
            "requeueing delivery for another attempt"
        ),
        RetryTarget::DeadLetter => error!(
            queue = destination,
            attempt = decision.attempt_count,
            "retry budget exhausted, sending to dlq"
        ),
    }

    let properties = stamp_retry_count(&delivery.properties, decision.attempt_count);

    if let Err(err) = channel
        .basic_publish(
            "",
            destination,
            BasicPublishOptions::default(),
            &delivery.data,
            properties,
        )
        .await
    {
        error!(
            error = err.to_string(),
            queue = destination,
            "error republishing delivery"
        );
        span.record_error(&err);
        span.set_status(Status::Error {
            description: Cow::from("error republishing delivery"),
        });

        return Err(match decision.target {
            RetryTarget::Requeue => AmqpError::RequeuingMessageError,
            RetryTarget::DeadLetter => AmqpError::PublishingToDlqError,
        });
    }

    match delivery.ack(BasicAckOptions { multiple: false }).await {
        Err(err) => {
            error!("error whiling ack msg");
            span.record_error(&err);
            span.set_status(Status::Error {
                description: Cow::from("error to ack msg"),
            });
            Err(AmqpError::AckMessageError)
        }
        _ => {
            span.set_status(Status::Ok);
            Ok(())
        }
    }
}

/// Reads the retry count header from a delivery's properties. Absent or
/// unreadable headers count as a first delivery.
pub(crate) fn extract_retry_count(props: &AMQPProperties) -> i64 {
    let headers = match props.headers() {
        Some(val) => val.to_owned(),
        None => FieldTable::default(),
    };

    match headers.inner().get(RETRY_COUNT_HEADER) {
        Some(AMQPValue::LongLongInt(v)) => *v,
        Some(AMQPValue::LongInt(v)) => *v as i64,
        Some(AMQPValue::ShortInt(v)) => *v as i64,
        Some(AMQPValue::LongUInt(v)) => *v as i64,
        _ => 0,
    }
}

/// Returns the delivery's properties with the retry count header set,
/// preserving every other header (trace context included).
fn stamp_retry_count(props: &AMQPProperties, attempt_count: i64) -> AMQPProperties {
    let mut headers = props
        .headers()
        .clone()
        .unwrap_or_default()
        .inner()
        .clone();
    headers.insert(
        ShortString::from(RETRY_COUNT_HEADER),
        AMQPValue::LongLongInt(attempt_count),
    );
    props.clone().with_headers(FieldTable::from(headers))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::HandlerError;
    use crate::message::{Company, VideoMetadata};
    use crate::queue::QueueDefinition;
    use async_trait::async_trait;
    use lapin::BasicProperties;
    use opentelemetry::Context;
    use std::collections::BTreeMap;

    struct AcceptsEverything;

    #[async_trait]
    impl ConsumerHandler<VideoMetadata> for AcceptsEverything {
        async fn handle(&self, _: &Context, _: &VideoMetadata) -> Result<(), HandlerError> {
            Ok(())
        }
    }

    struct RejectsEverything;

    #[async_trait]
    impl ConsumerHandler<VideoMetadata> for RejectsEverything {
        async fn handle(&self, _: &Context, _: &VideoMetadata) -> Result<(), HandlerError> {
            Err(HandlerError::new("storage write failed"))
        }
    }

    fn valid_payload() -> Vec<u8> {
        crate::message::encode(&VideoMetadata {
            video_id: "v1".to_owned(),
            timestamp: "2025-06-01T10:00:00Z".to_owned(),
            company: Company {
                id: 7,
                name: "acme".to_owned(),
            },
            extra: Default::default(),
        })
        .unwrap()
    }

    fn props_with_count(count: i64) -> AMQPProperties {
        let mut headers = BTreeMap::<ShortString, AMQPValue>::default();
        headers.insert(
            ShortString::from(RETRY_COUNT_HEADER),
            AMQPValue::LongLongInt(count),
        );
        BasicProperties::default().with_headers(FieldTable::from(headers))
    }

    #[test]
    fn missing_header_counts_as_first_delivery() {
        assert_eq!(extract_retry_count(&BasicProperties::default()), 0);
    }

    #[test]
    fn header_round_trips_through_stamping() {
        assert_eq!(extract_retry_count(&props_with_count(5)), 5);

        let stamped = stamp_retry_count(&BasicProperties::default(), 2);
        assert_eq!(extract_retry_count(&stamped), 2);

        let restamped = stamp_retry_count(&stamped, 3);
        assert_eq!(extract_retry_count(&restamped), 3);
    }

    #[test]
    fn stamping_preserves_other_headers() {
        let mut headers = BTreeMap::<ShortString, AMQPValue>::default();
        headers.insert(
            ShortString::from("traceparent"),
            AMQPValue::LongString("00-abc-def-01".into()),
        );
        let props = BasicProperties::default().with_headers(FieldTable::from(headers));

        let stamped = stamp_retry_count(&props, 1);
        let stamped_headers = stamped.headers().clone().unwrap_or_default();
        assert!(stamped_headers.inner().contains_key("traceparent"));
        assert_eq!(extract_retry_count(&stamped), 1);
    }

    #[test]
    fn non_integer_header_counts_as_first_delivery() {
        let mut headers = BTreeMap::<ShortString, AMQPValue>::default();
        headers.insert(
            ShortString::from(RETRY_COUNT_HEADER),
            AMQPValue::LongString("three".into()),
        );
        let props = BasicProperties::default().with_headers(FieldTable::from(headers));
        assert_eq!(extract_retry_count(&props), 0);
    }

    #[tokio::test]
    async fn valid_payload_reaches_the_handler() {
        let handler: Arc<dyn ConsumerHandler<VideoMetadata>> = Arc::new(AcceptsEverything);
        let outcome = process_payload(&valid_payload(), &Context::new(), &handler).await;
        assert!(outcome.is_ok());
    }

    #[tokio::test]
    async fn malformed_payload_fails_even_when_the_handler_would_accept() {
        let handler: Arc<dyn ConsumerHandler<VideoMetadata>> = Arc::new(AcceptsEverything);
        let outcome = process_payload(b"not json", &Context::new(), &handler).await;
        assert!(matches!(outcome, Err(AmqpError::DecodeError(_))));
    }

    #[tokio::test]
    async fn handler_failure_maps_to_a_consumer_error() {
        let handler: Arc<dyn ConsumerHandler<VideoMetadata>> = Arc::new(RejectsEverything);
        let outcome = process_payload(&valid_payload(), &Context::new(), &handler).await;
        assert!(matches!(outcome, Err(AmqpError::ConsumerError(_))));
    }

    // A malformed payload and a failing handler must walk the identical
    // retry lifecycle: requeued with counts 1, 2, then dead-lettered on the
    // third delivery, never acknowledged as processed.
    #[tokio::test]
    async fn decode_failure_walks_the_same_retry_path_as_handler_failure() {
        let def = QueueDefinition::new("video_metadata").with_max_retries(3);
        let policy = RetryPolicy::new(&def);

        let accepting: Arc<dyn ConsumerHandler<VideoMetadata>> = Arc::new(AcceptsEverything);
        let rejecting: Arc<dyn ConsumerHandler<VideoMetadata>> = Arc::new(RejectsEverything);

        let cases: Vec<(Vec<u8>, &Arc<dyn ConsumerHandler<VideoMetadata>>)> =
            vec![(b"not json".to_vec(), &accepting), (valid_payload(), &rejecting)];

        for (payload, handler) in cases {
            let mut props = BasicProperties::default();
            let mut requeues = vec![];

            loop {
                let outcome = process_payload(&payload, &Context::new(), handler).await;
                assert!(outcome.is_err());

                let decision = policy.decide(extract_retry_count(&props));
                props = stamp_retry_count(&props, decision.attempt_count);
                match decision.target {
                    RetryTarget::Requeue => requeues.push(decision.attempt_count),
                    RetryTarget::DeadLetter => {
                        assert_eq!(policy.destination(&decision), "video_metadata.dlq");
                        break;
                    }
                }
            }

            assert_eq!(requeues, vec![1, 2]);
        }
    }

    // A delivery that always fails walks the full retry lifecycle: requeued
    // with counts 1, 2, then dead-lettered on the third delivery.
    #[test]
    fn failing_delivery_lifecycle_ends_in_dlq() {
        let def = QueueDefinition::new("video_metadata").with_max_retries(3);
        let policy = RetryPolicy::new(&def);

        let mut props = BasicProperties::default();
        let mut requeues = vec![];

        loop {
            let count = extract_retry_count(&props);
            let decision = policy.decide(count);
            props = stamp_retry_count(&props, decision.attempt_count);
            match decision.target {
                RetryTarget::Requeue => requeues.push(decision.attempt_count),
                RetryTarget::DeadLetter => {
                    assert_eq!(policy.destination(&decision), "video_metadata.dlq");
                    break;
                }
            }
        }

        assert_eq!(requeues, vec![1, 2]);
    }

    #[test]
    fn budget_of_one_dead_letters_first_failure() {
        let def = QueueDefinition::new("video_metadata").with_max_retries(1);
        let policy = RetryPolicy::new(&def);

        let decision = policy.decide(extract_retry_count(&BasicProperties::default()));
        assert_eq!(decision.target, RetryTarget::DeadLetter);
    }
}
