// Background drain loop: long-poll the queue, unwrap each notification,
// forward the payload to the output channel, optionally acknowledge.
//
// Errors never leave this task. A failed poll backs off and retries, a bad
// envelope is skipped, a failed acknowledgment is logged. Cancellation is
// checked between polls; a poll already in flight finishes its bounded wait
// and its batch is still emitted before the loop exits. A message is only
// acknowledged once its payload reached the output channel; a closed output
// ends the loop.
use std::sync::Arc;
use std::time::Duration;
use tap_cloud::{MessagingClient, ReceiveOptions, ReceivedMessage};
use tap_common::ids::{QueueUrl, TopicArn};
use tap_wire::NotificationEnvelope;
use tokio::sync::{mpsc, watch};

use crate::config::{AckMode, OutputMode};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DrainStats {
    pub polls: u64,
    pub received: u64,
    pub emitted: u64,
    pub malformed: u64,
    pub acked: u64,
    pub receive_errors: u64,
    pub ack_errors: u64,
}

pub struct DrainLoop {
    pub client: Arc<dyn MessagingClient>,
    pub queue_url: QueueUrl,
    pub topic: TopicArn,
    pub options: ReceiveOptions,
    pub ack_mode: AckMode,
    pub output_mode: OutputMode,
    pub backoff: Duration,
    pub output: mpsc::Sender<String>,
    pub cancel: watch::Receiver<bool>,
}

async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    // A dropped sender also means nobody wants more output.
    let _ = cancel.wait_for(|stop| *stop).await;
}

impl DrainLoop {
    pub fn spawn(self) -> tokio::task::JoinHandle<DrainStats> {
        tokio::spawn(self.run())
    }

    pub async fn run(mut self) -> DrainStats {
        let mut stats = DrainStats::default();
        tracing::debug!(queue_url = %self.queue_url, ack = ?self.ack_mode, "drain loop started");
        'poll: while !self.is_cancelled() {
            stats.polls += 1;
            match self
                .client
                .receive_messages(&self.queue_url, self.options)
                .await
            {
                Ok(batch) => {
                    metrics::counter!("tap_messages_received_total").increment(batch.len() as u64);
                    // Short polls return at once; pace them like a failed poll.
                    let idle = batch.is_empty() && self.options.wait_time_seconds == 0;
                    for message in batch {
                        if !self.handle(message, &mut stats).await {
                            tracing::warn!("output closed; stopping drain");
                            break 'poll;
                        }
                    }
                    if idle {
                        self.pause().await;
                    }
                }
                Err(err) => {
                    stats.receive_errors += 1;
                    metrics::counter!("tap_receive_errors_total").increment(1);
                    tracing::warn!(error = %err, "receive failed; retrying");
                    self.pause().await;
                }
            }
        }
        tracing::info!(
            received = stats.received,
            emitted = stats.emitted,
            malformed = stats.malformed,
            acked = stats.acked,
            receive_errors = stats.receive_errors,
            "drain loop stopped"
        );
        stats
    }

    /// Cancelled explicitly, or the control side dropped its sender.
    fn is_cancelled(&self) -> bool {
        *self.cancel.borrow() || self.cancel.has_changed().is_err()
    }

    async fn pause(&mut self) {
        tokio::select! {
            _ = cancelled(&mut self.cancel) => {}
            _ = tokio::time::sleep(self.backoff) => {}
        }
    }

    /// Returns `false` once the output side is gone.
    async fn handle(&self, message: ReceivedMessage, stats: &mut DrainStats) -> bool {
        stats.received += 1;
        let body = message.body.as_deref().unwrap_or_default();
        let delivered = match NotificationEnvelope::parse(body) {
            Ok(envelope) => {
                if !envelope.is_from(&self.topic) {
                    tracing::warn!(
                        message_id = ?message.message_id,
                        source = ?envelope.topic_arn,
                        "delivery from unexpected topic"
                    );
                }
                let line = match self.output_mode {
                    OutputMode::Message => envelope.payload_text(),
                    OutputMode::Raw => body.to_string(),
                };
                self.emit(line, stats).await
            }
            Err(err) => {
                stats.malformed += 1;
                metrics::counter!("tap_envelope_parse_errors_total").increment(1);
                tracing::warn!(
                    message_id = ?message.message_id,
                    error = %err,
                    "skipping malformed envelope"
                );
                match self.output_mode {
                    OutputMode::Raw => self.emit(body.to_string(), stats).await,
                    OutputMode::Message => true,
                }
            }
        };
        // Unprinted messages stay in the queue.
        if !delivered {
            return false;
        }

        // Malformed deliveries are acknowledged too so they cannot come back.
        if self.ack_mode == AckMode::Delete {
            self.acknowledge(&message, stats).await;
        }
        true
    }

    async fn acknowledge(&self, message: &ReceivedMessage, stats: &mut DrainStats) {
        let Some(receipt) = message.receipt_handle.as_ref() else {
            tracing::warn!(message_id = ?message.message_id, "delivery without receipt handle");
            return;
        };
        match self.client.delete_message(&self.queue_url, receipt).await {
            Ok(()) => stats.acked += 1,
            Err(err) => {
                stats.ack_errors += 1;
                metrics::counter!("tap_ack_errors_total").increment(1);
                tracing::warn!(message_id = ?message.message_id, error = %err, "acknowledge failed");
            }
        }
    }

    async fn emit(&self, line: String, stats: &mut DrainStats) -> bool {
        if self.output.send(line).await.is_err() {
            return false;
        }
        stats.emitted += 1;
        metrics::counter!("tap_messages_emitted_total").increment(1);
        true
    }
}
