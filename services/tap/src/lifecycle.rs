//! Run state machine for one tap session.
//!
//! # Flow
//! `Init → IdentityResolved → QueueProvisioned → Subscribed → Draining →
//! TearingDown → Done`. Provisioning is strictly sequential on the control
//! task. A stop request arriving while a step is running is honored once that
//! step finishes, so teardown never overlaps a provisioning call.
//!
//! # Exit paths
//! Every path (fatal provisioning error, operator stop, interrupt) goes
//! through the same `TearingDown` step, which releases whatever was acquired
//! in reverse order and always reaches `Done`. Teardown failures are reported
//! in the [`RunReport`] but do not turn a successful run into an error.
use anyhow::Result;
use std::fmt;
use std::sync::Arc;
use tap_cloud::MessagingClient;
use tap_common::ids::TopicArn;
use tap_common::{QueueResource, SubscriptionBinding};
use tokio::sync::{mpsc, watch};

use crate::config::TapConfig;
use crate::drain::{DrainLoop, DrainStats};
use crate::provision::{QueueRequest, provision};
use crate::stop::{StopReason, StopSignal};
use crate::teardown::{TeardownManager, TeardownReport};
use crate::{identity, subscribe};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RunState {
    Init,
    IdentityResolved,
    QueueProvisioned,
    Subscribed,
    Draining,
    TearingDown,
    Done,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunState::Init => "init",
            RunState::IdentityResolved => "identity_resolved",
            RunState::QueueProvisioned => "queue_provisioned",
            RunState::Subscribed => "subscribed",
            RunState::Draining => "draining",
            RunState::TearingDown => "tearing_down",
            RunState::Done => "done",
        };
        f.write_str(name)
    }
}

#[derive(Debug)]
struct StateTracker {
    history: Vec<RunState>,
}

impl StateTracker {
    fn new() -> Self {
        Self {
            history: vec![RunState::Init],
        }
    }

    fn current(&self) -> RunState {
        self.history.last().copied().unwrap_or(RunState::Init)
    }

    fn advance(&mut self, next: RunState) {
        debug_assert!(next > self.current(), "state must move forward");
        tracing::debug!(from = %self.current(), to = %next, "state transition");
        self.history.push(next);
    }
}

#[derive(Debug)]
pub struct RunReport {
    /// What ended the session; `None` when a fatal error did.
    pub stop: Option<StopReason>,
    /// Highest state reached before teardown started.
    pub reached: RunState,
    pub history: Vec<RunState>,
    pub queue: Option<QueueResource>,
    pub binding: Option<SubscriptionBinding>,
    pub drain: Option<DrainStats>,
    pub teardown: TeardownReport,
}

/// Outcome of a run: the report is always produced, the error is set when a
/// provisioning stage failed.
#[derive(Debug)]
pub struct RunOutcome {
    pub report: RunReport,
    pub error: Option<anyhow::Error>,
}

impl RunOutcome {
    pub fn into_result(self) -> Result<RunReport> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(self.report),
        }
    }
}

#[derive(Default)]
struct Session {
    stop: Option<StopReason>,
    queue: Option<QueueResource>,
    binding: Option<SubscriptionBinding>,
    drain: Option<DrainStats>,
}

pub async fn run(
    client: Arc<dyn MessagingClient>,
    config: &TapConfig,
    topic: TopicArn,
    mut stop: StopSignal,
    output: mpsc::Sender<String>,
) -> RunOutcome {
    let teardown = TeardownManager::new(Arc::clone(&client));
    let mut states = StateTracker::new();
    let mut session = Session::default();

    let error = acquire_and_drain(
        &client,
        config,
        &topic,
        &mut stop,
        output,
        &teardown,
        &mut states,
        &mut session,
    )
    .await
    .err();
    if let Some(err) = &error {
        tracing::error!(state = %states.current(), error = %format!("{err:#}"), "run aborted");
    }

    let reached = states.current();
    states.advance(RunState::TearingDown);
    let released = teardown.run().await;
    if !released.is_clean() {
        tracing::warn!(failed = released.failed.len(), "teardown incomplete");
    }
    states.advance(RunState::Done);

    RunOutcome {
        report: RunReport {
            stop: session.stop,
            reached,
            history: states.history,
            queue: session.queue,
            binding: session.binding,
            drain: session.drain,
            teardown: released,
        },
        error,
    }
}

#[allow(clippy::too_many_arguments)]
async fn acquire_and_drain(
    client: &Arc<dyn MessagingClient>,
    config: &TapConfig,
    topic: &TopicArn,
    stop: &mut StopSignal,
    output: mpsc::Sender<String>,
    teardown: &TeardownManager,
    states: &mut StateTracker,
    session: &mut Session,
) -> Result<()> {
    let account = identity::resolve(client.as_ref()).await?;
    states.advance(RunState::IdentityResolved);
    if stopped_early(stop, states, session) {
        return Ok(());
    }

    let queue = provision(
        client.as_ref(),
        teardown,
        QueueRequest {
            region: &config.region,
            account: &account,
            topic,
            retention_seconds: config.retention_seconds,
        },
    )
    .await?;
    session.queue = Some(queue.clone());
    states.advance(RunState::QueueProvisioned);
    if stopped_early(stop, states, session) {
        return Ok(());
    }

    let binding = subscribe::bind(client.as_ref(), teardown, topic, &queue).await?;
    session.binding = Some(binding);
    states.advance(RunState::Subscribed);
    if stopped_early(stop, states, session) {
        return Ok(());
    }

    let (cancel_tx, cancel_rx) = watch::channel(false);
    let drain = DrainLoop {
        client: Arc::clone(client),
        queue_url: queue.url.clone(),
        topic: topic.clone(),
        options: config.receive_options(),
        ack_mode: config.ack_mode,
        output_mode: config.output_mode,
        backoff: config.poll_backoff(),
        output,
        cancel: cancel_rx,
    };
    let mut drain_task = drain.spawn();
    states.advance(RunState::Draining);
    tracing::info!("Press Enter to stop");

    let reason = tokio::select! {
        reason = stop.wait() => reason,
        finished = &mut drain_task => {
            // Only a closed output ends the drain without cancellation.
            match finished {
                Ok(stats) => session.drain = Some(stats),
                Err(err) => tracing::warn!(error = %err, "drain task failed"),
            }
            session.stop = Some(StopReason::OutputClosed);
            tracing::info!(reason = %StopReason::OutputClosed, "stopping");
            return Ok(());
        }
    };
    session.stop = Some(reason);
    tracing::info!(%reason, "stopping");

    let _ = cancel_tx.send(true);
    match tokio::time::timeout(config.drain_deadline(), &mut drain_task).await {
        Ok(Ok(stats)) => session.drain = Some(stats),
        Ok(Err(err)) => tracing::warn!(error = %err, "drain task failed"),
        Err(_) => {
            tracing::warn!("drain loop did not stop in time; aborting it");
            drain_task.abort();
        }
    }
    Ok(())
}

fn stopped_early(stop: &StopSignal, states: &StateTracker, session: &mut Session) -> bool {
    match stop.requested() {
        Some(reason) => {
            tracing::info!(%reason, state = %states.current(), "stop requested during provisioning");
            session.stop = Some(reason);
            true
        }
        None => false,
    }
}
