//! Ordered release of everything the tap acquired.
//!
//! # Model
//! Each acquisition pushes a [`Release`] onto a stack the moment the service
//! confirms the resource exists. [`TeardownManager::run`] pops the stack, so
//! releases happen in reverse acquisition order: the subscription goes before
//! the queue it points at.
//!
//! # Exactly once
//! `run` holds the stack lock for the whole pass and removes each action
//! before executing it. A second or concurrent caller waits for the first
//! pass and then finds an empty stack.
//!
//! # Failures
//! "Not found" means somebody already removed the resource and counts as
//! released. Any other failure is logged and counted but never stops the
//! remaining releases.
use std::fmt;
use std::sync::Arc;
use tap_cloud::MessagingClient;
use tap_common::ids::{QueueUrl, SubscriptionArn};
use tokio::sync::Mutex;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Release {
    Queue(QueueUrl),
    Subscription(SubscriptionArn),
}

impl fmt::Display for Release {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Release::Queue(url) => write!(f, "queue {url}"),
            Release::Subscription(arn) => write!(f, "subscription {arn}"),
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TeardownReport {
    pub released: Vec<Release>,
    pub already_gone: Vec<Release>,
    pub failed: Vec<(Release, String)>,
}

impl TeardownReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn is_empty(&self) -> bool {
        self.released.is_empty() && self.already_gone.is_empty() && self.failed.is_empty()
    }
}

pub struct TeardownManager {
    client: Arc<dyn MessagingClient>,
    stack: Mutex<Vec<Release>>,
}

impl TeardownManager {
    pub fn new(client: Arc<dyn MessagingClient>) -> Self {
        Self {
            client,
            stack: Mutex::new(Vec::new()),
        }
    }

    pub async fn push(&self, release: Release) {
        tracing::debug!(%release, "registered for teardown");
        self.stack.lock().await.push(release);
    }

    pub async fn pending(&self) -> Vec<Release> {
        self.stack.lock().await.clone()
    }

    pub async fn run(&self) -> TeardownReport {
        let mut stack = self.stack.lock().await;
        let mut report = TeardownReport::default();
        while let Some(release) = stack.pop() {
            let result = match &release {
                Release::Subscription(arn) => self.client.unsubscribe(arn).await,
                Release::Queue(url) => self.client.delete_queue(url).await,
            };
            match result {
                Ok(()) => {
                    tracing::info!(%release, "released");
                    report.released.push(release);
                }
                Err(err) if err.is_not_found() => {
                    tracing::info!(%release, "already gone");
                    report.already_gone.push(release);
                }
                Err(err) => {
                    metrics::counter!("tap_teardown_failures_total").increment(1);
                    tracing::warn!(
                        %release,
                        operation = err.operation(),
                        error = %err,
                        "release failed; resource may leak"
                    );
                    report.failed.push((release, err.to_string()));
                }
            }
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tap_cloud::{CloudCall, CloudOp, CreateQueueRequest, InMemoryCloud};
    use tap_common::ids::{QueueName, TopicArn};

    async fn acquired(cloud: &InMemoryCloud) -> (TeardownManager, QueueUrl, SubscriptionArn) {
        let topic: TopicArn = "T1".parse().expect("topic");
        cloud.register_topic(topic.clone()).await;
        let url = cloud
            .create_queue(CreateQueueRequest {
                name: QueueName::generate(),
                policy: "{}".to_string(),
                retention_seconds: 60,
            })
            .await
            .expect("create");
        let arn = cloud.queue_arn(&url).await.expect("arn");
        let sub = cloud.subscribe(&topic, &arn).await.expect("subscribe");
        let manager = TeardownManager::new(Arc::new(cloud.clone()));
        manager.push(Release::Queue(url.clone())).await;
        manager.push(Release::Subscription(sub.clone())).await;
        (manager, url, sub)
    }

    fn release_calls(journal: &[CloudCall]) -> Vec<CloudCall> {
        journal
            .iter()
            .filter(|call| matches!(call.op(), CloudOp::Unsubscribe | CloudOp::DeleteQueue))
            .cloned()
            .collect()
    }

    #[tokio::test]
    async fn releases_in_reverse_order() {
        let cloud = InMemoryCloud::default();
        let (manager, url, sub) = acquired(&cloud).await;

        let report = manager.run().await;
        assert!(report.is_clean());
        assert_eq!(
            report.released,
            vec![Release::Subscription(sub.clone()), Release::Queue(url.clone())]
        );
        assert_eq!(
            release_calls(&cloud.journal().await),
            vec![
                CloudCall::Unsubscribe { subscription: sub },
                CloudCall::DeleteQueue { url },
            ]
        );
    }

    #[tokio::test]
    async fn second_run_is_a_no_op() {
        let cloud = InMemoryCloud::default();
        let (manager, _, _) = acquired(&cloud).await;
        manager.run().await;
        let again = manager.run().await;
        assert!(again.is_empty());
        assert_eq!(cloud.calls_of(CloudOp::Unsubscribe).await, 1);
        assert_eq!(cloud.calls_of(CloudOp::DeleteQueue).await, 1);
    }

    #[tokio::test]
    async fn concurrent_runs_release_once() {
        let cloud = InMemoryCloud::default();
        let (manager, _, _) = acquired(&cloud).await;
        let (first, second) = tokio::join!(manager.run(), manager.run());
        assert_eq!(first.released.len() + second.released.len(), 2);
        assert_eq!(cloud.calls_of(CloudOp::Unsubscribe).await, 1);
        assert_eq!(cloud.calls_of(CloudOp::DeleteQueue).await, 1);
    }

    #[tokio::test]
    async fn missing_resources_count_as_released() {
        let cloud = InMemoryCloud::default();
        let (manager, url, sub) = acquired(&cloud).await;
        cloud.unsubscribe(&sub).await.expect("external unsubscribe");
        cloud.delete_queue(&url).await.expect("external delete");

        let report = manager.run().await;
        assert!(report.is_clean());
        assert!(report.released.is_empty());
        assert_eq!(report.already_gone.len(), 2);
    }

    #[tokio::test]
    async fn failure_does_not_stop_later_releases() {
        let cloud = InMemoryCloud::default();
        let (manager, url, sub) = acquired(&cloud).await;
        cloud.fail(CloudOp::Unsubscribe, 1).await;

        let report = manager.run().await;
        assert!(!report.is_clean());
        assert_eq!(report.failed[0].0, Release::Subscription(sub));
        assert_eq!(report.released, vec![Release::Queue(url)]);
        assert!(manager.pending().await.is_empty());
    }
}
