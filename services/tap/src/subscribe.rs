// Binds the provisioned queue to the topic.
use anyhow::{Context, Result};
use tap_cloud::MessagingClient;
use tap_common::ids::TopicArn;
use tap_common::{QueueResource, SubscriptionBinding};

use crate::teardown::{Release, TeardownManager};

pub async fn bind(
    client: &dyn MessagingClient,
    teardown: &TeardownManager,
    topic: &TopicArn,
    queue: &QueueResource,
) -> Result<SubscriptionBinding> {
    let arn = client
        .subscribe(topic, &queue.arn)
        .await
        .with_context(|| format!("subscribe queue to {topic}"))?;
    teardown.push(Release::Subscription(arn.clone())).await;
    tracing::info!(subscription = %arn, "created subscription");
    Ok(SubscriptionBinding {
        arn,
        topic: topic.clone(),
        queue_arn: queue.arn.clone(),
    })
}
