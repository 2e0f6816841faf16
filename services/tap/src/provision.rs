// Queue provisioning: unique name, topic-scoped access policy, bounded
// retention, then ARN resolution.
use anyhow::{Context, Result};
use tap_cloud::{CreateQueueRequest, MessagingClient};
use tap_common::QueueResource;
use tap_common::ids::{AccountId, QueueName, TopicArn};

use crate::teardown::{Release, TeardownManager};

pub struct QueueRequest<'a> {
    pub region: &'a str,
    pub account: &'a AccountId,
    pub topic: &'a TopicArn,
    pub retention_seconds: u32,
}

/// Create the queue and resolve its ARN.
///
/// The queue is registered for teardown as soon as creation succeeds, so a
/// failed ARN lookup still leaves it scheduled for deletion.
pub async fn provision(
    client: &dyn MessagingClient,
    teardown: &TeardownManager,
    request: QueueRequest<'_>,
) -> Result<QueueResource> {
    let name = QueueName::generate();
    tracing::info!(
        region = request.region,
        account = %request.account,
        queue = %name,
        "provisioning queue"
    );
    let policy = tap_wire::render_queue_policy(request.region, request.account, &name, request.topic)
        .context("render queue policy")?;

    let url = client
        .create_queue(CreateQueueRequest {
            name,
            policy,
            retention_seconds: request.retention_seconds,
        })
        .await
        .context("create queue")?;
    teardown.push(Release::Queue(url.clone())).await;
    tracing::info!(queue_url = %url, "created queue");

    let arn = client.queue_arn(&url).await.context("resolve queue arn")?;
    tracing::info!(queue_arn = %arn, "resolved queue arn");

    Ok(QueueResource {
        name,
        url,
        arn,
        retention_seconds: request.retention_seconds,
    })
}
