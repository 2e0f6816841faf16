// Termination trigger shared by every stop source.
// The first reason recorded wins; later triggers are ignored, so the operator
// pressing Enter while an interrupt is also arriving still yields one shutdown.
use std::fmt;
use std::io::BufRead;
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Operator confirmed on stdin.
    Operator,
    /// Ctrl-C / SIGINT.
    Interrupt,
    /// Nobody reads the printed payloads any more.
    OutputClosed,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::Operator => f.write_str("operator"),
            StopReason::Interrupt => f.write_str("interrupt"),
            StopReason::OutputClosed => f.write_str("output_closed"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct StopHandle {
    tx: watch::Sender<Option<StopReason>>,
}

#[derive(Debug, Clone)]
pub struct StopSignal {
    rx: watch::Receiver<Option<StopReason>>,
}

pub fn channel() -> (StopHandle, StopSignal) {
    let (tx, rx) = watch::channel(None);
    (StopHandle { tx }, StopSignal { rx })
}

impl StopHandle {
    /// Record `reason` unless a stop was already requested. Returns whether
    /// this call was the one that triggered shutdown.
    pub fn trigger(&self, reason: StopReason) -> bool {
        self.tx.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = Some(reason);
            true
        })
    }
}

impl StopSignal {
    /// Non-blocking check used between provisioning steps.
    pub fn requested(&self) -> Option<StopReason> {
        *self.rx.borrow()
    }

    /// Wait for the first stop request. If every handle is gone without a
    /// trigger nothing can stop the run any more, which is reported as an
    /// operator stop.
    pub async fn wait(&mut self) -> StopReason {
        match self.rx.wait_for(Option::is_some).await {
            Ok(reason) => (*reason).unwrap_or(StopReason::Operator),
            Err(_) => {
                tracing::debug!("all stop sources closed");
                StopReason::Operator
            }
        }
    }
}

/// Exit status used when a second interrupt abandons teardown.
pub const FORCED_EXIT_CODE: i32 = 130;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterruptAction {
    /// Begin the orderly shutdown.
    Stop,
    /// Shutdown is already underway; give up on it.
    Exit,
}

/// Decide what an interrupt means given the current stop state.
pub fn on_interrupt(handle: &StopHandle) -> InterruptAction {
    if handle.trigger(StopReason::Interrupt) {
        InterruptAction::Stop
    } else {
        InterruptAction::Exit
    }
}

/// Listen for Ctrl-C on the runtime. The first interrupt requests a stop;
/// one arriving after shutdown started exits the process immediately.
pub fn spawn_interrupt_listener(handle: StopHandle) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            if let Err(err) = tokio::signal::ctrl_c().await {
                tracing::warn!(error = %err, "failed to listen for interrupt");
                return;
            }
            match on_interrupt(&handle) {
                InterruptAction::Stop => {
                    tracing::info!("interrupt received; press Ctrl-C again to exit immediately")
                }
                InterruptAction::Exit => {
                    tracing::warn!("second interrupt; exiting without finishing teardown");
                    std::process::exit(FORCED_EXIT_CODE);
                }
            }
        }
    })
}

/// Read stdin on a dedicated thread; a line means stop. The thread is not
/// joined so a pending read never holds the process open. End of input leaves
/// the interrupt as the only stop source.
pub fn spawn_operator_listener(handle: StopHandle) {
    let spawned = std::thread::Builder::new()
        .name("tap-stdin".to_string())
        .spawn(move || {
            let mut line = String::new();
            match std::io::stdin().lock().read_line(&mut line) {
                Ok(0) => tracing::debug!("stdin closed; waiting for interrupt"),
                Ok(_) => {
                    if handle.trigger(StopReason::Operator) {
                        tracing::info!("stop requested by operator");
                    }
                }
                Err(err) => tracing::warn!(error = %err, "failed to read stdin"),
            }
        });
    if let Err(err) = spawned {
        tracing::warn!(error = %err, "failed to spawn stdin listener");
    }
}
