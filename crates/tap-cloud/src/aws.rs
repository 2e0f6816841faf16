// AWS-backed MessagingClient built on the official SDK clients.
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_sqs::config::Region;
use aws_sdk_sqs::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_sqs::types::QueueAttributeName;
use std::fmt::Debug;
use tap_common::ids::{AccountId, QueueArn, QueueUrl, ReceiptHandle, SubscriptionArn, TopicArn};

use crate::{
    CloudError, CloudResult, CreateQueueRequest, MessagingClient, ReceiveOptions, ReceivedMessage,
};

// Error codes the services use for "that resource is already gone".
const NOT_FOUND_CODES: &[&str] = &[
    "AWS.SimpleQueueService.NonExistentQueue",
    "QueueDoesNotExist",
    "NotFound",
    "NotFoundException",
];

/// Subscription protocol for queue endpoints.
const QUEUE_PROTOCOL: &str = "sqs";

#[derive(Debug, Clone)]
pub struct AwsMessagingClient {
    sts: aws_sdk_sts::Client,
    sqs: aws_sdk_sqs::Client,
    sns: aws_sdk_sns::Client,
}

impl AwsMessagingClient {
    /// Load shared AWS configuration (profiles, environment, instance roles)
    /// and pin every client to `region`.
    pub async fn connect(region: &str) -> Self {
        let shared = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(region.to_string()))
            .load()
            .await;
        Self {
            sts: aws_sdk_sts::Client::new(&shared),
            sqs: aws_sdk_sqs::Client::new(&shared),
            sns: aws_sdk_sns::Client::new(&shared),
        }
    }
}

fn classify<E, R>(operation: &'static str, err: SdkError<E, R>) -> CloudError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
    R: Debug,
{
    let not_found = err
        .code()
        .is_some_and(|code| NOT_FOUND_CODES.contains(&code));
    let detail = DisplayErrorContext(&err).to_string();
    if not_found {
        CloudError::NotFound { operation, detail }
    } else {
        CloudError::Service { operation, detail }
    }
}

#[async_trait]
impl MessagingClient for AwsMessagingClient {
    async fn caller_account(&self) -> CloudResult<AccountId> {
        let output = self
            .sts
            .get_caller_identity()
            .send()
            .await
            .map_err(|err| classify("GetCallerIdentity", err))?;
        output
            .account()
            .map(AccountId::new)
            .ok_or(CloudError::MissingField {
                operation: "GetCallerIdentity",
                field: "Account",
            })
    }

    async fn create_queue(&self, request: CreateQueueRequest) -> CloudResult<QueueUrl> {
        let output = self
            .sqs
            .create_queue()
            .queue_name(request.name.to_string())
            .attributes(QueueAttributeName::Policy, request.policy)
            .attributes(
                QueueAttributeName::MessageRetentionPeriod,
                request.retention_seconds.to_string(),
            )
            .send()
            .await
            .map_err(|err| classify("CreateQueue", err))?;
        output
            .queue_url()
            .map(QueueUrl::new)
            .ok_or(CloudError::MissingField {
                operation: "CreateQueue",
                field: "QueueUrl",
            })
    }

    async fn queue_arn(&self, url: &QueueUrl) -> CloudResult<QueueArn> {
        let output = self
            .sqs
            .get_queue_attributes()
            .queue_url(url.as_str())
            .attribute_names(QueueAttributeName::QueueArn)
            .send()
            .await
            .map_err(|err| classify("GetQueueAttributes", err))?;
        output
            .attributes()
            .and_then(|attrs| attrs.get(&QueueAttributeName::QueueArn))
            .map(QueueArn::new)
            .ok_or(CloudError::MissingField {
                operation: "GetQueueAttributes",
                field: "QueueArn",
            })
    }

    async fn delete_queue(&self, url: &QueueUrl) -> CloudResult<()> {
        self.sqs
            .delete_queue()
            .queue_url(url.as_str())
            .send()
            .await
            .map_err(|err| classify("DeleteQueue", err))?;
        Ok(())
    }

    async fn subscribe(&self, topic: &TopicArn, endpoint: &QueueArn) -> CloudResult<SubscriptionArn> {
        // Queue endpoints confirm automatically; ask for the arn in the response.
        let output = self
            .sns
            .subscribe()
            .topic_arn(topic.as_str())
            .protocol(QUEUE_PROTOCOL)
            .endpoint(endpoint.as_str())
            .return_subscription_arn(true)
            .send()
            .await
            .map_err(|err| classify("Subscribe", err))?;
        output
            .subscription_arn()
            .map(SubscriptionArn::new)
            .ok_or(CloudError::MissingField {
                operation: "Subscribe",
                field: "SubscriptionArn",
            })
    }

    async fn unsubscribe(&self, subscription: &SubscriptionArn) -> CloudResult<()> {
        self.sns
            .unsubscribe()
            .subscription_arn(subscription.as_str())
            .send()
            .await
            .map_err(|err| classify("Unsubscribe", err))?;
        Ok(())
    }

    async fn receive_messages(
        &self,
        url: &QueueUrl,
        options: ReceiveOptions,
    ) -> CloudResult<Vec<ReceivedMessage>> {
        let output = self
            .sqs
            .receive_message()
            .queue_url(url.as_str())
            .max_number_of_messages(options.max_messages)
            .wait_time_seconds(options.wait_time_seconds)
            .set_visibility_timeout(options.visibility_timeout_seconds)
            .send()
            .await
            .map_err(|err| classify("ReceiveMessage", err))?;
        Ok(output
            .messages()
            .iter()
            .map(|msg| ReceivedMessage {
                message_id: msg.message_id().map(str::to_string),
                receipt_handle: msg.receipt_handle().map(ReceiptHandle::new),
                body: msg.body().map(str::to_string),
            })
            .collect())
    }

    async fn delete_message(&self, url: &QueueUrl, receipt: &ReceiptHandle) -> CloudResult<()> {
        self.sqs
            .delete_message()
            .queue_url(url.as_str())
            .receipt_handle(receipt.as_str())
            .send()
            .await
            .map_err(|err| classify("DeleteMessage", err))?;
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "aws"
    }
}
