//! Messaging-service collaborator for the tap.
//!
//! # Purpose
//! `MessagingClient` is the narrow surface the tap needs from the cloud: caller
//! identity, queue create/lookup/delete, topic subscribe/unsubscribe, and the
//! receive/delete pair used by the drain loop. Transport, retries and
//! credentials stay inside the SDK.
//!
//! # Backends
//! - [`aws::AwsMessagingClient`] talks to STS, SQS and SNS.
//! - [`memory::InMemoryCloud`] keeps everything in process and journals every
//!   call so lifecycle ordering can be asserted in tests.
use async_trait::async_trait;
use tap_common::ids::{AccountId, QueueArn, QueueName, QueueUrl, ReceiptHandle, SubscriptionArn, TopicArn};
use thiserror::Error;

pub mod aws;
pub mod memory;

pub use aws::AwsMessagingClient;
pub use memory::{CloudCall, CloudOp, InMemoryCloud};

#[derive(Debug, Error)]
pub enum CloudError {
    #[error("{operation}: not found: {detail}")]
    NotFound {
        operation: &'static str,
        detail: String,
    },
    #[error("{operation} failed: {detail}")]
    Service {
        operation: &'static str,
        detail: String,
    },
    #[error("{operation}: response missing {field}")]
    MissingField {
        operation: &'static str,
        field: &'static str,
    },
}

impl CloudError {
    /// Deleting something that is already gone is not a failure.
    pub fn is_not_found(&self) -> bool {
        matches!(self, CloudError::NotFound { .. })
    }

    pub fn operation(&self) -> &'static str {
        match self {
            CloudError::NotFound { operation, .. }
            | CloudError::Service { operation, .. }
            | CloudError::MissingField { operation, .. } => operation,
        }
    }
}

pub type CloudResult<T> = Result<T, CloudError>;

#[derive(Debug, Clone)]
pub struct CreateQueueRequest {
    pub name: QueueName,
    pub policy: String,
    pub retention_seconds: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReceiveOptions {
    pub max_messages: i32,
    pub wait_time_seconds: i32,
    pub visibility_timeout_seconds: Option<i32>,
}

impl Default for ReceiveOptions {
    fn default() -> Self {
        // Longest long-poll the service allows, full batch.
        Self {
            max_messages: 10,
            wait_time_seconds: 20,
            visibility_timeout_seconds: None,
        }
    }
}

/// One delivery as handed back by a receive call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedMessage {
    pub message_id: Option<String>,
    pub receipt_handle: Option<ReceiptHandle>,
    pub body: Option<String>,
}

#[async_trait]
pub trait MessagingClient: Send + Sync {
    async fn caller_account(&self) -> CloudResult<AccountId>;

    async fn create_queue(&self, request: CreateQueueRequest) -> CloudResult<QueueUrl>;
    async fn queue_arn(&self, url: &QueueUrl) -> CloudResult<QueueArn>;
    async fn delete_queue(&self, url: &QueueUrl) -> CloudResult<()>;

    async fn subscribe(&self, topic: &TopicArn, endpoint: &QueueArn) -> CloudResult<SubscriptionArn>;
    async fn unsubscribe(&self, subscription: &SubscriptionArn) -> CloudResult<()>;

    async fn receive_messages(
        &self,
        url: &QueueUrl,
        options: ReceiveOptions,
    ) -> CloudResult<Vec<ReceivedMessage>>;
    async fn delete_message(&self, url: &QueueUrl, receipt: &ReceiptHandle) -> CloudResult<()>;

    fn backend_name(&self) -> &'static str;
}
