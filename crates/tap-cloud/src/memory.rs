//! In-memory implementation of the messaging collaborator.
//!
//! # Purpose
//! Models just enough of the topic/queue services to exercise the tap end to
//! end without network access:
//! - topics must be registered before they can be subscribed to
//! - publishing to a topic wraps the payload in a notification envelope and
//!   enqueues it into every subscribed queue
//! - received messages move in flight until deleted by receipt handle
//! - deleting a queue or subscription that does not exist reports `NotFound`
//!
//! # Journal
//! Every trait call is appended to a journal before it is evaluated, including
//! calls that fail. Tests use it to assert ordering (unsubscribe before queue
//! delete) and absence of calls (no subscribe after a failed create).
//!
//! # Fault injection
//! `fail(op, times)` makes the next `times` calls of `op` return a
//! `CloudError::Service` without touching state.
use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tap_common::ids::{AccountId, QueueArn, QueueName, QueueUrl, ReceiptHandle, SubscriptionArn, TopicArn};
use tokio::sync::{Mutex, Notify};

use crate::{
    CloudError, CloudResult, CreateQueueRequest, MessagingClient, ReceiveOptions, ReceivedMessage,
};

const REGION: &str = "eu-west-1";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CloudOp {
    CallerIdentity,
    CreateQueue,
    QueueArn,
    DeleteQueue,
    Subscribe,
    Unsubscribe,
    Receive,
    DeleteMessage,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloudCall {
    CallerIdentity,
    CreateQueue { name: QueueName },
    QueueArn { url: QueueUrl },
    DeleteQueue { url: QueueUrl },
    Subscribe { topic: TopicArn, endpoint: QueueArn },
    Unsubscribe { subscription: SubscriptionArn },
    Receive { url: QueueUrl },
    DeleteMessage { url: QueueUrl, receipt: ReceiptHandle },
}

impl CloudCall {
    pub fn op(&self) -> CloudOp {
        match self {
            CloudCall::CallerIdentity => CloudOp::CallerIdentity,
            CloudCall::CreateQueue { .. } => CloudOp::CreateQueue,
            CloudCall::QueueArn { .. } => CloudOp::QueueArn,
            CloudCall::DeleteQueue { .. } => CloudOp::DeleteQueue,
            CloudCall::Subscribe { .. } => CloudOp::Subscribe,
            CloudCall::Unsubscribe { .. } => CloudOp::Unsubscribe,
            CloudCall::Receive { .. } => CloudOp::Receive,
            CloudCall::DeleteMessage { .. } => CloudOp::DeleteMessage,
        }
    }
}

#[derive(Debug)]
struct StoredQueue {
    name: QueueName,
    arn: QueueArn,
    policy: String,
    retention_seconds: u32,
    ready: VecDeque<(String, String)>,
    in_flight: HashMap<ReceiptHandle, (String, String)>,
    notify: Arc<Notify>,
}

#[derive(Debug)]
struct Subscription {
    topic: TopicArn,
    endpoint: QueueArn,
}

#[derive(Debug, Default)]
struct State {
    topics: HashSet<TopicArn>,
    queues: HashMap<QueueUrl, StoredQueue>,
    subscriptions: HashMap<SubscriptionArn, Subscription>,
    journal: Vec<CloudCall>,
    faults: HashMap<CloudOp, usize>,
    next_id: u64,
}

impl State {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn record(&mut self, call: CloudCall) -> CloudResult<()> {
        let op = call.op();
        self.journal.push(call);
        if let Some(remaining) = self.faults.get_mut(&op)
            && *remaining > 0
        {
            *remaining -= 1;
            return Err(CloudError::Service {
                operation: op_name(op),
                detail: "injected failure".to_string(),
            });
        }
        Ok(())
    }

    fn queue_by_arn(&mut self, arn: &QueueArn) -> Option<&mut StoredQueue> {
        self.queues.values_mut().find(|queue| &queue.arn == arn)
    }
}

fn op_name(op: CloudOp) -> &'static str {
    match op {
        CloudOp::CallerIdentity => "GetCallerIdentity",
        CloudOp::CreateQueue => "CreateQueue",
        CloudOp::QueueArn => "GetQueueAttributes",
        CloudOp::DeleteQueue => "DeleteQueue",
        CloudOp::Subscribe => "Subscribe",
        CloudOp::Unsubscribe => "Unsubscribe",
        CloudOp::Receive => "ReceiveMessage",
        CloudOp::DeleteMessage => "DeleteMessage",
    }
}

fn not_found(op: CloudOp, what: impl std::fmt::Display) -> CloudError {
    CloudError::NotFound {
        operation: op_name(op),
        detail: what.to_string(),
    }
}

/// Shared in-process cloud; clones observe the same state.
#[derive(Debug, Clone)]
pub struct InMemoryCloud {
    account: AccountId,
    state: Arc<Mutex<State>>,
}

impl Default for InMemoryCloud {
    fn default() -> Self {
        Self::new(AccountId::new("000000000000"))
    }
}

impl InMemoryCloud {
    pub fn new(account: AccountId) -> Self {
        Self {
            account,
            state: Arc::new(Mutex::new(State::default())),
        }
    }

    pub async fn register_topic(&self, topic: TopicArn) {
        self.state.lock().await.topics.insert(topic);
    }

    /// Make the next `times` calls of `op` fail with a service error.
    pub async fn fail(&self, op: CloudOp, times: usize) {
        self.state.lock().await.faults.insert(op, times);
    }

    /// Publish `payload` to `topic`, delivering a notification envelope into
    /// every subscribed queue. Returns the number of queues reached.
    pub async fn publish(&self, topic: &TopicArn, payload: &str) -> usize {
        let mut state = self.state.lock().await;
        let message_id = format!("msg-{}", state.next_id());
        let body = serde_json::json!({
            "Type": "Notification",
            "MessageId": message_id,
            "TopicArn": topic.as_str(),
            "Message": payload,
        })
        .to_string();
        let endpoints: Vec<QueueArn> = state
            .subscriptions
            .values()
            .filter(|sub| &sub.topic == topic)
            .map(|sub| sub.endpoint.clone())
            .collect();
        let mut delivered = 0;
        for endpoint in endpoints {
            if let Some(queue) = state.queue_by_arn(&endpoint) {
                queue.ready.push_back((message_id.clone(), body.clone()));
                queue.notify.notify_one();
                delivered += 1;
            }
        }
        delivered
    }

    /// Enqueue an arbitrary body directly, bypassing the topic.
    pub async fn push_raw(&self, url: &QueueUrl, body: &str) -> bool {
        let mut state = self.state.lock().await;
        let message_id = format!("raw-{}", state.next_id());
        match state.queues.get_mut(url) {
            Some(queue) => {
                queue.ready.push_back((message_id, body.to_string()));
                queue.notify.notify_one();
                true
            }
            None => false,
        }
    }

    pub async fn journal(&self) -> Vec<CloudCall> {
        self.state.lock().await.journal.clone()
    }

    pub async fn calls_of(&self, op: CloudOp) -> usize {
        self.state
            .lock()
            .await
            .journal
            .iter()
            .filter(|call| call.op() == op)
            .count()
    }

    pub async fn queue_urls(&self) -> Vec<QueueUrl> {
        self.state.lock().await.queues.keys().cloned().collect()
    }

    pub async fn queue_policy(&self, url: &QueueUrl) -> Option<String> {
        self.state
            .lock()
            .await
            .queues
            .get(url)
            .map(|queue| queue.policy.clone())
    }

    pub async fn queue_retention(&self, url: &QueueUrl) -> Option<u32> {
        self.state
            .lock()
            .await
            .queues
            .get(url)
            .map(|queue| queue.retention_seconds)
    }

    /// Messages still held by a queue, visible or in flight.
    pub async fn pending(&self, url: &QueueUrl) -> usize {
        self.state
            .lock()
            .await
            .queues
            .get(url)
            .map(|queue| queue.ready.len() + queue.in_flight.len())
            .unwrap_or(0)
    }

    pub async fn subscription_count(&self) -> usize {
        self.state.lock().await.subscriptions.len()
    }
}

#[async_trait]
impl MessagingClient for InMemoryCloud {
    async fn caller_account(&self) -> CloudResult<AccountId> {
        self.state.lock().await.record(CloudCall::CallerIdentity)?;
        Ok(self.account.clone())
    }

    async fn create_queue(&self, request: CreateQueueRequest) -> CloudResult<QueueUrl> {
        let mut state = self.state.lock().await;
        state.record(CloudCall::CreateQueue { name: request.name })?;
        let url = QueueUrl::new(format!(
            "https://sqs.{REGION}.amazonaws.com/{}/{}",
            self.account, request.name
        ));
        let arn = QueueArn::new(format!(
            "arn:aws:sqs:{REGION}:{}:{}",
            self.account, request.name
        ));
        state.queues.insert(
            url.clone(),
            StoredQueue {
                name: request.name,
                arn,
                policy: request.policy,
                retention_seconds: request.retention_seconds,
                ready: VecDeque::new(),
                in_flight: HashMap::new(),
                notify: Arc::new(Notify::new()),
            },
        );
        Ok(url)
    }

    async fn queue_arn(&self, url: &QueueUrl) -> CloudResult<QueueArn> {
        let mut state = self.state.lock().await;
        state.record(CloudCall::QueueArn { url: url.clone() })?;
        state
            .queues
            .get(url)
            .map(|queue| queue.arn.clone())
            .ok_or_else(|| not_found(CloudOp::QueueArn, url))
    }

    async fn delete_queue(&self, url: &QueueUrl) -> CloudResult<()> {
        let mut state = self.state.lock().await;
        state.record(CloudCall::DeleteQueue { url: url.clone() })?;
        let queue = state
            .queues
            .remove(url)
            .ok_or_else(|| not_found(CloudOp::DeleteQueue, url))?;
        // Wake a pending long-poll so it observes the deletion.
        queue.notify.notify_one();
        tracing::debug!(queue = %queue.name, "in-memory queue deleted");
        Ok(())
    }

    async fn subscribe(&self, topic: &TopicArn, endpoint: &QueueArn) -> CloudResult<SubscriptionArn> {
        let mut state = self.state.lock().await;
        state.record(CloudCall::Subscribe {
            topic: topic.clone(),
            endpoint: endpoint.clone(),
        })?;
        if !state.topics.contains(topic) {
            return Err(not_found(CloudOp::Subscribe, topic));
        }
        if state.queue_by_arn(endpoint).is_none() {
            return Err(not_found(CloudOp::Subscribe, endpoint));
        }
        let arn = SubscriptionArn::new(format!("{topic}:sub-{}", state.next_id()));
        state.subscriptions.insert(
            arn.clone(),
            Subscription {
                topic: topic.clone(),
                endpoint: endpoint.clone(),
            },
        );
        Ok(arn)
    }

    async fn unsubscribe(&self, subscription: &SubscriptionArn) -> CloudResult<()> {
        let mut state = self.state.lock().await;
        state.record(CloudCall::Unsubscribe {
            subscription: subscription.clone(),
        })?;
        state
            .subscriptions
            .remove(subscription)
            .map(|_| ())
            .ok_or_else(|| not_found(CloudOp::Unsubscribe, subscription))
    }

    async fn receive_messages(
        &self,
        url: &QueueUrl,
        options: ReceiveOptions,
    ) -> CloudResult<Vec<ReceivedMessage>> {
        let notify = {
            let mut state = self.state.lock().await;
            state.record(CloudCall::Receive { url: url.clone() })?;
            let queue = state
                .queues
                .get(url)
                .ok_or_else(|| not_found(CloudOp::Receive, url))?;
            if queue.ready.is_empty() {
                Some(Arc::clone(&queue.notify))
            } else {
                None
            }
        };
        if let Some(notify) = notify {
            let wait = Duration::from_secs(options.wait_time_seconds.max(0) as u64);
            let _ = tokio::time::timeout(wait, notify.notified()).await;
        }

        let mut state = self.state.lock().await;
        let next = state.next_id;
        let Some(queue) = state.queues.get_mut(url) else {
            return Err(not_found(CloudOp::Receive, url));
        };
        let take = options.max_messages.clamp(1, 10) as usize;
        let mut batch = Vec::new();
        for offset in 0..take {
            let Some((message_id, body)) = queue.ready.pop_front() else {
                break;
            };
            let receipt = ReceiptHandle::new(format!("rh-{}-{offset}", next + 1));
            queue
                .in_flight
                .insert(receipt.clone(), (message_id.clone(), body.clone()));
            batch.push(ReceivedMessage {
                message_id: Some(message_id),
                receipt_handle: Some(receipt),
                body: Some(body),
            });
        }
        if !batch.is_empty() {
            state.next_id += 1;
        }
        Ok(batch)
    }

    async fn delete_message(&self, url: &QueueUrl, receipt: &ReceiptHandle) -> CloudResult<()> {
        let mut state = self.state.lock().await;
        state.record(CloudCall::DeleteMessage {
            url: url.clone(),
            receipt: receipt.clone(),
        })?;
        let queue = state
            .queues
            .get_mut(url)
            .ok_or_else(|| not_found(CloudOp::DeleteMessage, url))?;
        queue
            .in_flight
            .remove(receipt)
            .map(|_| ())
            .ok_or_else(|| CloudError::Service {
                operation: op_name(CloudOp::DeleteMessage),
                detail: format!("receipt handle is invalid: {receipt}"),
            })
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
