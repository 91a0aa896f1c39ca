//! Message bus plumbing.
//!
//! JetStream work-queue streams give the core its durable, at-least-once
//! delivery contract: inbound classified comments are pulled one at a time
//! (`max_ack_pending = 1`) and acked only after the full
//! record → decide → publish → mark sequence, outbound speak requests are
//! published with acks and capped-backoff retries. Transport failures are
//! retried, never fatal.

use std::time::Duration;

use anyhow::{anyhow, Context as _, Result};
use async_nats::jetstream::{self, consumer};
use async_trait::async_trait;
use futures_util::StreamExt;
use tracing::{info, warn};

use crate::models::SpeakRequest;
use crate::orchestrator::SpeakSink;

const DURABLE_NAME: &str = "orchestrator";
const STREAM_MAX_MESSAGES: i64 = 100_000;
const PUBLISH_ATTEMPTS: u32 = 5;
const BACKOFF_INITIAL: Duration = Duration::from_millis(250);
const BACKOFF_CAP: Duration = Duration::from_secs(5);

pub struct Bus {
    jetstream: jetstream::Context,
}

impl Bus {
    /// Connect to NATS, retrying with capped backoff until the server is
    /// reachable. After this, the client reconnects on its own.
    pub async fn connect(url: &str) -> Self {
        let mut delay = BACKOFF_INITIAL;
        let client = loop {
            match async_nats::connect(url).await {
                Ok(client) => break client,
                Err(error) => {
                    warn!(url, %error, retry_in = ?delay, "NATS connect failed");
                    tokio::time::sleep(delay).await;
                    delay = (delay * 2).min(BACKOFF_CAP);
                }
            }
        };

        info!(url, "connected to NATS");
        Self {
            jetstream: jetstream::new(client),
        }
    }

    /// Durable pull consumer over the inbound work queue, prefetching a
    /// single message so the hot path stays strictly ordered.
    pub async fn comment_consumer(&self, subject: &str) -> Result<CommentConsumer> {
        let stream = self
            .jetstream
            .get_or_create_stream(jetstream::stream::Config {
                name: stream_name(subject),
                subjects: vec![subject.to_string()],
                retention: jetstream::stream::RetentionPolicy::WorkQueue,
                max_messages: STREAM_MAX_MESSAGES,
                ..Default::default()
            })
            .await
            .map_err(|error| anyhow!("creating stream for {subject}: {error}"))?;

        let consumer = stream
            .get_or_create_consumer(
                DURABLE_NAME,
                consumer::pull::Config {
                    durable_name: Some(DURABLE_NAME.to_string()),
                    ack_policy: consumer::AckPolicy::Explicit,
                    max_ack_pending: 1,
                    ..Default::default()
                },
            )
            .await
            .map_err(|error| anyhow!("creating consumer for {subject}: {error}"))?;

        let messages = consumer
            .messages()
            .await
            .map_err(|error| anyhow!("subscribing to {subject}: {error}"))?;

        info!(subject, "consuming classified comments");
        Ok(CommentConsumer { messages })
    }

    /// Publisher for the outbound speak-request queue. Ensures the stream
    /// exists up front so requests are durable from the first publish.
    pub async fn speak_publisher(&self, subject: &str) -> Result<SpeakPublisher> {
        self.jetstream
            .get_or_create_stream(jetstream::stream::Config {
                name: stream_name(subject),
                subjects: vec![subject.to_string()],
                retention: jetstream::stream::RetentionPolicy::WorkQueue,
                max_messages: STREAM_MAX_MESSAGES,
                ..Default::default()
            })
            .await
            .map_err(|error| anyhow!("creating stream for {subject}: {error}"))?;

        info!(subject, "speak publisher ready");
        Ok(SpeakPublisher {
            jetstream: self.jetstream.clone(),
            subject: subject.to_string(),
        })
    }
}

pub struct CommentConsumer {
    messages: consumer::pull::Stream,
}

impl CommentConsumer {
    /// Next inbound message, or `None` when the subscription ends.
    pub async fn next(&mut self) -> Option<Result<InboundMessage>> {
        let item = self.messages.next().await?;
        Some(
            item.map(|message| InboundMessage { message })
                .map_err(|error| anyhow!("consuming message: {error}")),
        )
    }
}

pub struct InboundMessage {
    message: jetstream::Message,
}

impl InboundMessage {
    pub fn payload(&self) -> &[u8] {
        &self.message.payload
    }

    /// Acknowledge after all side effects are committed; redelivery on a
    /// crash before this point is the at-least-once contract at work.
    pub async fn ack(self) -> Result<()> {
        self.message
            .ack()
            .await
            .map_err(|error| anyhow!("acking message: {error}"))
    }
}

pub struct SpeakPublisher {
    jetstream: jetstream::Context,
    subject: String,
}

#[async_trait]
impl SpeakSink for SpeakPublisher {
    async fn publish(&self, request: &SpeakRequest) -> Result<()> {
        let payload = serde_json::to_vec(request).context("serializing speak request")?;

        let mut delay = BACKOFF_INITIAL;
        for attempt in 1..=PUBLISH_ATTEMPTS {
            let publish = self
                .jetstream
                .publish(self.subject.clone(), payload.clone().into())
                .await;
            match publish {
                Ok(ack) => match ack.await {
                    Ok(_) => return Ok(()),
                    Err(error) => {
                        warn!(attempt, %error, "speak publish unacked, retrying");
                    }
                },
                Err(error) => {
                    warn!(attempt, %error, "speak publish failed, retrying");
                }
            }
            tokio::time::sleep(delay).await;
            delay = (delay * 2).min(BACKOFF_CAP);
        }

        Err(anyhow!(
            "speak request not accepted after {PUBLISH_ATTEMPTS} attempts"
        ))
    }
}

fn stream_name(subject: &str) -> String {
    subject.replace(['.', '*', '>'], "_").to_uppercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_names_are_uppercased_and_token_safe() {
        assert_eq!(stream_name("classified_comments"), "CLASSIFIED_COMMENTS");
        assert_eq!(stream_name("live.speak.requests"), "LIVE_SPEAK_REQUESTS");
    }
}
