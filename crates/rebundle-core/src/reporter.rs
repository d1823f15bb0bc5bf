//! Resign pipeline reporting

use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use crate::pipeline::PipelineState;

/// Events emitted while a bundle is re-signed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResignEvent {
    /// A stage is starting
    StageStarted { stage: PipelineState },
    /// A stage finished without failing
    StageCompleted {
        stage: PipelineState,
        duration: Duration,
    },
    /// A member package had its identity rewritten
    MemberPatched { path: PathBuf, patched: bool },
    /// A file was signed
    MemberSigned { path: PathBuf },
    /// A file could not be signed
    MemberFailed { path: PathBuf, error: String },
    /// Output of an external tool, verbatim
    ToolOutput {
        tool: String,
        output: String,
        success: bool,
    },
    /// Cancellation was observed before `stage` started
    Cancelled { stage: PipelineState },
    /// The run is over
    Finished {
        state: PipelineState,
        succeeded: usize,
        failed: usize,
        duration: Duration,
    },
}

/// Trait for reporting resign progress
pub trait ResignReporter: Send + Sync {
    /// Handle an event
    fn report(&self, event: &ResignEvent);
}

/// Reporter that logs to tracing
#[derive(Debug, Default)]
pub struct TracingReporter;

impl ResignReporter for TracingReporter {
    fn report(&self, event: &ResignEvent) {
        match event {
            ResignEvent::StageStarted { stage } => {
                tracing::info!("{}...", stage);
            }
            ResignEvent::StageCompleted { stage, duration } => {
                tracing::debug!("{} done in {:.1}s", stage, duration.as_secs_f64());
            }
            ResignEvent::MemberPatched { path, patched } => {
                if *patched {
                    tracing::debug!("Patched identity of {}", path.display());
                } else {
                    tracing::warn!("Could not patch identity of {}", path.display());
                }
            }
            ResignEvent::MemberSigned { path } => {
                tracing::info!("Signed {}", path.display());
            }
            ResignEvent::MemberFailed { path, error } => {
                tracing::error!("Failed to sign {}: {}", path.display(), error);
            }
            ResignEvent::ToolOutput {
                tool,
                output,
                success,
            } => {
                if *success {
                    tracing::info!("{} output:\n{}", tool, output);
                } else {
                    tracing::error!("{} failed:\n{}", tool, output);
                }
            }
            ResignEvent::Cancelled { stage } => {
                tracing::warn!("Cancelled before {}", stage);
            }
            ResignEvent::Finished {
                state,
                succeeded,
                failed,
                duration,
            } => {
                tracing::info!(
                    "Finished ({}): {} signed, {} failed ({:.1}s)",
                    state,
                    succeeded,
                    failed,
                    duration.as_secs_f64()
                );
            }
        }
    }
}

/// Reporter that collects events for later inspection
#[derive(Debug, Default)]
pub struct CollectingReporter {
    events: Mutex<Vec<ResignEvent>>,
}

impl CollectingReporter {
    /// All collected events
    pub fn events(&self) -> Vec<ResignEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    /// Stages that started, in order
    pub fn started_stages(&self) -> Vec<PipelineState> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                ResignEvent::StageStarted { stage } => Some(stage),
                _ => None,
            })
            .collect()
    }
}

impl ResignReporter for CollectingReporter {
    fn report(&self, event: &ResignEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
    }
}
