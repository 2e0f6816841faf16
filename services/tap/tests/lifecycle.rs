//! End-to-end lifecycle tests against the in-memory messaging backend.
//!
//! # Purpose
//! Validate the acquisition/teardown protocol across exit paths:
//! - interrupt and operator stop while draining
//! - fatal failures at each provisioning stage
//! - stop requests that arrive before draining starts
//! - release ordering (unsubscribe strictly before queue delete)
//! - a drain that overruns its shutdown deadline, and a closed output
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tap::config::{AckMode, TapConfig};
use tap::lifecycle::{self, RunOutcome, RunState};
use tap::stop::{self, StopHandle, StopReason};
use tap_cloud::{
    CloudCall, CloudOp, CloudResult, CreateQueueRequest, InMemoryCloud, MessagingClient,
    ReceiveOptions, ReceivedMessage,
};
use tap_common::ids::{
    AccountId, QueueArn, QueueUrl, ReceiptHandle, SubscriptionArn, TopicArn,
};
use tap_wire::PolicyDocument;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;

fn topic() -> TopicArn {
    "T1".parse().expect("topic")
}

fn config() -> TapConfig {
    TapConfig {
        wait_time_seconds: 1,
        poll_backoff_ms: 10,
        drain_grace_ms: 500,
        ..TapConfig::default()
    }
}

struct Running {
    cloud: InMemoryCloud,
    stop: StopHandle,
    output: mpsc::Receiver<String>,
    task: JoinHandle<RunOutcome>,
}

async fn start(cloud: InMemoryCloud, config: TapConfig) -> Running {
    let (stop, signal) = stop::channel();
    let (tx, output) = mpsc::channel(16);
    let client: Arc<dyn MessagingClient> = Arc::new(cloud.clone());
    let task = tokio::spawn(async move { lifecycle::run(client, &config, topic(), signal, tx).await });
    Running {
        cloud,
        stop,
        output,
        task,
    }
}

async fn wait_for_subscription(cloud: &InMemoryCloud) {
    timeout(Duration::from_secs(3), async {
        while cloud.subscription_count().await == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("subscription created");
}

async fn finish(task: JoinHandle<RunOutcome>) -> RunOutcome {
    timeout(Duration::from_secs(5), task)
        .await
        .expect("run finished")
        .expect("join")
}

fn release_calls(journal: &[CloudCall]) -> Vec<CloudOp> {
    journal
        .iter()
        .map(CloudCall::op)
        .filter(|op| matches!(op, CloudOp::Unsubscribe | CloudOp::DeleteQueue))
        .collect()
}

async fn topic_cloud() -> InMemoryCloud {
    let cloud = InMemoryCloud::new(AccountId::new("123456789012"));
    cloud.register_topic(topic()).await;
    cloud
}

#[tokio::test]
async fn hello_is_printed_and_interrupt_tears_down_in_order() -> Result<()> {
    let mut run = start(topic_cloud().await, config()).await;
    wait_for_subscription(&run.cloud).await;

    assert_eq!(run.cloud.publish(&topic(), "hello").await, 1);
    let line = timeout(Duration::from_secs(3), run.output.recv())
        .await?
        .expect("output");
    assert_eq!(line, "hello");

    // The live queue only accepts sends from the tapped topic.
    let url = run.cloud.queue_urls().await.pop().expect("queue");
    let policy = PolicyDocument::from_json(&run.cloud.queue_policy(&url).await.expect("policy"))?;
    assert_eq!(policy.source_topics().collect::<Vec<_>>(), vec!["T1"]);

    assert!(run.stop.trigger(StopReason::Interrupt));
    let report = finish(run.task).await.into_result()?;

    assert_eq!(report.stop, Some(StopReason::Interrupt));
    assert_eq!(report.reached, RunState::Draining);
    assert_eq!(report.history.last(), Some(&RunState::Done));
    assert!(report.teardown.is_clean());
    assert_eq!(report.drain.expect("drain stats").emitted, 1);

    let journal = run.cloud.journal().await;
    assert_eq!(
        release_calls(&journal),
        vec![CloudOp::Unsubscribe, CloudOp::DeleteQueue]
    );
    let binding = report.binding.expect("binding");
    let queue = report.queue.expect("queue");
    assert!(journal.contains(&CloudCall::Unsubscribe {
        subscription: binding.arn
    }));
    assert!(journal.contains(&CloudCall::DeleteQueue { url: queue.url }));
    assert!(run.cloud.queue_urls().await.is_empty());
    assert_eq!(run.cloud.subscription_count().await, 0);
    Ok(())
}

#[tokio::test]
async fn operator_stop_takes_the_same_path() -> Result<()> {
    let run = start(topic_cloud().await, config()).await;
    wait_for_subscription(&run.cloud).await;

    run.stop.trigger(StopReason::Operator);
    let report = finish(run.task).await.into_result()?;
    assert_eq!(report.stop, Some(StopReason::Operator));
    assert_eq!(
        release_calls(&run.cloud.journal().await),
        vec![CloudOp::Unsubscribe, CloudOp::DeleteQueue]
    );
    Ok(())
}

#[tokio::test]
async fn identity_failure_provisions_nothing() {
    let cloud = topic_cloud().await;
    cloud.fail(CloudOp::CallerIdentity, 1).await;
    let run = start(cloud, config()).await;

    let outcome = finish(run.task).await;
    let err = outcome.error.expect("fatal");
    assert!(format!("{err:#}").contains("resolve caller identity"));
    assert_eq!(outcome.report.reached, RunState::Init);
    assert!(outcome.report.teardown.is_empty());
    assert_eq!(run.cloud.calls_of(CloudOp::CreateQueue).await, 0);
}

#[tokio::test]
async fn queue_creation_failure_never_subscribes() {
    let cloud = topic_cloud().await;
    cloud.fail(CloudOp::CreateQueue, 1).await;
    let run = start(cloud, config()).await;

    let outcome = finish(run.task).await;
    assert!(outcome.error.is_some());
    assert_eq!(outcome.report.reached, RunState::IdentityResolved);
    assert_eq!(run.cloud.calls_of(CloudOp::Subscribe).await, 0);
    assert_eq!(run.cloud.calls_of(CloudOp::DeleteQueue).await, 0);
    assert!(outcome.into_result().is_err());
}

#[tokio::test]
async fn arn_failure_still_deletes_the_queue() {
    let cloud = topic_cloud().await;
    cloud.fail(CloudOp::QueueArn, 1).await;
    let run = start(cloud, config()).await;

    let outcome = finish(run.task).await;
    assert!(outcome.error.is_some());
    assert_eq!(run.cloud.calls_of(CloudOp::Subscribe).await, 0);
    assert_eq!(
        release_calls(&run.cloud.journal().await),
        vec![CloudOp::DeleteQueue]
    );
    assert!(run.cloud.queue_urls().await.is_empty());
}

#[tokio::test]
async fn subscribe_failure_still_deletes_the_queue() {
    // Topic never registered, so the subscribe call is refused.
    let cloud = InMemoryCloud::default();
    let run = start(cloud, config()).await;

    let outcome = finish(run.task).await;
    let err = outcome.error.expect("fatal");
    assert!(format!("{err:#}").contains("subscribe queue to T1"));
    assert_eq!(outcome.report.reached, RunState::QueueProvisioned);
    assert_eq!(run.cloud.calls_of(CloudOp::Unsubscribe).await, 0);
    assert_eq!(run.cloud.calls_of(CloudOp::DeleteQueue).await, 1);
    assert!(run.cloud.queue_urls().await.is_empty());
}

#[tokio::test]
async fn stop_before_start_only_resolves_identity() -> Result<()> {
    let cloud = topic_cloud().await;
    let (stop, signal) = stop::channel();
    stop.trigger(StopReason::Interrupt);
    let (tx, _rx) = mpsc::channel(1);

    let outcome = lifecycle::run(Arc::new(cloud.clone()), &config(), topic(), signal, tx).await;
    let report = outcome.into_result()?;
    assert_eq!(report.stop, Some(StopReason::Interrupt));
    assert_eq!(report.reached, RunState::IdentityResolved);
    assert!(report.queue.is_none());
    assert_eq!(cloud.calls_of(CloudOp::CreateQueue).await, 0);
    Ok(())
}

#[tokio::test]
async fn teardown_failure_is_reported_not_fatal() -> Result<()> {
    let cloud = topic_cloud().await;
    let run = start(cloud, config()).await;
    wait_for_subscription(&run.cloud).await;
    run.cloud.fail(CloudOp::Unsubscribe, 1).await;

    run.stop.trigger(StopReason::Interrupt);
    let report = finish(run.task).await.into_result()?;
    assert_eq!(report.teardown.failed.len(), 1);
    assert_eq!(report.teardown.released.len(), 1);
    // The queue is still removed after the failed unsubscribe.
    assert!(run.cloud.queue_urls().await.is_empty());
    Ok(())
}

#[tokio::test]
async fn malformed_then_valid_envelope_while_running() -> Result<()> {
    let mut run = start(topic_cloud().await, config()).await;
    wait_for_subscription(&run.cloud).await;
    let url = run.cloud.queue_urls().await.pop().expect("queue");

    run.cloud.push_raw(&url, "<xml>nope</xml>").await;
    run.cloud.publish(&topic(), "still here").await;
    let line = timeout(Duration::from_secs(3), run.output.recv())
        .await?
        .expect("output");
    assert_eq!(line, "still here");

    run.stop.trigger(StopReason::Interrupt);
    let report = finish(run.task).await.into_result()?;
    let stats = report.drain.expect("drain stats");
    assert_eq!(stats.malformed, 1);
    assert_eq!(stats.emitted, 1);
    Ok(())
}

#[tokio::test]
async fn ack_none_never_deletes_messages() -> Result<()> {
    let config = TapConfig {
        ack_mode: AckMode::None,
        ..config()
    };
    let mut run = start(topic_cloud().await, config).await;
    wait_for_subscription(&run.cloud).await;

    run.cloud.publish(&topic(), "peek").await;
    let line = timeout(Duration::from_secs(3), run.output.recv())
        .await?
        .expect("output");
    assert_eq!(line, "peek");

    run.stop.trigger(StopReason::Interrupt);
    finish(run.task).await.into_result()?;
    assert_eq!(run.cloud.calls_of(CloudOp::DeleteMessage).await, 0);
    Ok(())
}

#[tokio::test]
async fn queue_names_differ_between_runs() -> Result<()> {
    let mut names = std::collections::HashSet::new();
    for _ in 0..5 {
        let cloud = topic_cloud().await;
        let (stop, signal) = stop::channel();
        let (tx, _rx) = mpsc::channel(1);
        let client: Arc<dyn MessagingClient> = Arc::new(cloud.clone());
        let config = config();
        let task =
            tokio::spawn(async move { lifecycle::run(client, &config, topic(), signal, tx).await });
        wait_for_subscription(&cloud).await;
        stop.trigger(StopReason::Interrupt);
        let report = finish(task).await.into_result()?;
        names.insert(report.queue.expect("queue").name);
    }
    assert_eq!(names.len(), 5);
    Ok(())
}

/// Delegates to the in-memory cloud but never answers a receive call in time.
struct StallingCloud {
    inner: InMemoryCloud,
    stall: Duration,
}

#[async_trait]
impl MessagingClient for StallingCloud {
    async fn caller_account(&self) -> CloudResult<AccountId> {
        self.inner.caller_account().await
    }

    async fn create_queue(&self, request: CreateQueueRequest) -> CloudResult<QueueUrl> {
        self.inner.create_queue(request).await
    }

    async fn queue_arn(&self, url: &QueueUrl) -> CloudResult<QueueArn> {
        self.inner.queue_arn(url).await
    }

    async fn delete_queue(&self, url: &QueueUrl) -> CloudResult<()> {
        self.inner.delete_queue(url).await
    }

    async fn subscribe(&self, topic: &TopicArn, endpoint: &QueueArn) -> CloudResult<SubscriptionArn> {
        self.inner.subscribe(topic, endpoint).await
    }

    async fn unsubscribe(&self, subscription: &SubscriptionArn) -> CloudResult<()> {
        self.inner.unsubscribe(subscription).await
    }

    async fn receive_messages(
        &self,
        _url: &QueueUrl,
        _options: ReceiveOptions,
    ) -> CloudResult<Vec<ReceivedMessage>> {
        tokio::time::sleep(self.stall).await;
        Ok(Vec::new())
    }

    async fn delete_message(&self, url: &QueueUrl, receipt: &ReceiptHandle) -> CloudResult<()> {
        self.inner.delete_message(url, receipt).await
    }

    fn backend_name(&self) -> &'static str {
        "stalling"
    }
}

#[tokio::test]
async fn overrunning_drain_is_aborted_and_teardown_still_runs() -> Result<()> {
    let cloud = topic_cloud().await;
    let client: Arc<dyn MessagingClient> = Arc::new(StallingCloud {
        inner: cloud.clone(),
        stall: Duration::from_secs(30),
    });
    let config = TapConfig {
        drain_grace_ms: 200,
        ..config()
    };
    let deadline = config.drain_deadline();
    let (stop, signal) = stop::channel();
    let (tx, _rx) = mpsc::channel(1);
    let task = tokio::spawn(async move { lifecycle::run(client, &config, topic(), signal, tx).await });
    wait_for_subscription(&cloud).await;

    let stopped_at = Instant::now();
    stop.trigger(StopReason::Interrupt);
    let report = finish(task).await.into_result()?;
    let elapsed = stopped_at.elapsed();

    assert!(elapsed >= deadline, "returned after {elapsed:?}");
    assert!(elapsed < deadline + Duration::from_secs(2), "returned after {elapsed:?}");
    assert!(report.drain.is_none());
    assert_eq!(report.stop, Some(StopReason::Interrupt));
    assert!(report.teardown.is_clean());
    assert_eq!(
        release_calls(&cloud.journal().await),
        vec![CloudOp::Unsubscribe, CloudOp::DeleteQueue]
    );
    Ok(())
}

#[tokio::test]
async fn closed_output_ends_the_run_without_deleting_messages() -> Result<()> {
    let cloud = topic_cloud().await;
    let (_stop, signal) = stop::channel();
    let (tx, rx) = mpsc::channel(1);
    drop(rx);
    let client: Arc<dyn MessagingClient> = Arc::new(cloud.clone());
    let config = config();
    let task = tokio::spawn(async move { lifecycle::run(client, &config, topic(), signal, tx).await });
    wait_for_subscription(&cloud).await;

    cloud.publish(&topic(), "nobody listening").await;
    let report = finish(task).await.into_result()?;
    assert_eq!(report.stop, Some(StopReason::OutputClosed));
    assert_eq!(report.reached, RunState::Draining);
    let stats = report.drain.expect("drain stats");
    assert_eq!(stats.emitted, 0);
    assert_eq!(stats.acked, 0);
    assert_eq!(cloud.calls_of(CloudOp::DeleteMessage).await, 0);
    assert_eq!(
        release_calls(&cloud.journal().await),
        vec![CloudOp::Unsubscribe, CloudOp::DeleteQueue]
    );
    Ok(())
}
