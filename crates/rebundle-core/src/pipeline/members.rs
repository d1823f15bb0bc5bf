//! Concurrent signing of many files
//!
//! Each file is signed on its own blocking worker with its own engine
//! session; nothing native is shared between workers.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::Arc;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use super::signer::FileSigner;
use super::state::{FailurePolicy, MemberCounts};
use crate::reporter::{ResignEvent, ResignReporter};

/// Result of signing a batch of files
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    /// Per-file tallies
    pub counts: MemberCounts,
    /// Files that failed, with the reason
    pub failures: Vec<(PathBuf, String)>,
    /// Cancellation stopped files from being started
    pub cancelled: bool,
    /// Fail-fast stopped files from being started
    pub stopped_early: bool,
}

/// Number of concurrent workers for a configured degree of parallelism
///
/// Absent means one worker per file; zero or negative means the system's
/// available parallelism.
pub fn worker_limit(max_degree_of_parallelism: Option<i64>, files: usize) -> usize {
    match max_degree_of_parallelism {
        None => files.max(1),
        Some(n) if n <= 0 => std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1),
        Some(n) => usize::try_from(n).unwrap_or(usize::MAX),
    }
}

/// Sign `files` with at most `workers` signings in flight
///
/// Cancellation and fail-fast are checked before each file starts; a
/// signing already running always finishes.
#[instrument(skip_all, fields(files = files.len(), workers = workers))]
pub async fn sign_files(
    signer: Arc<dyn FileSigner>,
    files: Vec<PathBuf>,
    workers: usize,
    policy: FailurePolicy,
    cancel: &CancellationToken,
    reporter: &dyn ResignReporter,
) -> BatchReport {
    let workers = workers.max(1);
    let stop = cancel.child_token();
    let mut join_set = JoinSet::new();
    let mut report = BatchReport::default();
    let total = files.len();
    let mut started = 0;

    for path in files {
        while join_set.len() >= workers {
            match join_set.join_next().await {
                Some(joined) => record(&mut report, joined, policy, &stop, reporter),
                None => break,
            }
        }
        if stop.is_cancelled() {
            break;
        }

        let signer = signer.clone();
        join_set.spawn_blocking(move || {
            let result = catch_unwind(AssertUnwindSafe(|| signer.sign_file(&path)))
                .map_err(panic_message)
                .and_then(|signed| signed.map_err(|e| e.to_string()));
            (path, result)
        });
        started += 1;
    }

    while let Some(joined) = join_set.join_next().await {
        record(&mut report, joined, policy, &stop, reporter);
    }

    let skipped = total - started;
    if skipped > 0 && cancel.is_cancelled() {
        report.cancelled = true;
        warn!(skipped, "Cancellation observed; remaining files not started");
    } else if skipped > 0 {
        report.stopped_early = true;
        debug!(skipped, "Stopped after first failure");
    }

    report
}

type Joined = Result<(PathBuf, Result<rebundle_signing::SignOutcome, String>), tokio::task::JoinError>;

fn record(
    report: &mut BatchReport,
    joined: Joined,
    policy: FailurePolicy,
    stop: &CancellationToken,
    reporter: &dyn ResignReporter,
) {
    let (path, error) = match joined {
        Ok((path, Ok(_))) => {
            report.counts.succeeded += 1;
            reporter.report(&ResignEvent::MemberSigned { path });
            return;
        }
        Ok((path, Err(error))) => (path, error),
        // Panics are caught inside the worker, so only an aborted task lands here
        Err(e) => (PathBuf::new(), format!("signing worker failed: {}", e)),
    };

    report.counts.failed += 1;
    reporter.report(&ResignEvent::MemberFailed {
        path: path.clone(),
        error: error.clone(),
    });
    report.failures.push((path, error));
    if policy.stops_on_failure() {
        stop.cancel();
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    let detail = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    format!("signing worker panicked: {}", detail)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::state::FailureThreshold;
    use crate::pipeline::test_support::FakeSigner;
    use crate::reporter::CollectingReporter;

    fn paths(names: &[&str]) -> Vec<PathBuf> {
        names.iter().map(PathBuf::from).collect()
    }

    #[test]
    fn test_worker_limit() {
        assert_eq!(worker_limit(None, 7), 7);
        assert_eq!(worker_limit(None, 0), 1);
        assert_eq!(worker_limit(Some(3), 7), 3);
        assert!(worker_limit(Some(0), 7) >= 1);
        assert!(worker_limit(Some(-1), 7) >= 1);
    }

    #[tokio::test]
    async fn test_continue_on_error_counts() {
        let signer = Arc::new(FakeSigner::failing_on("two"));
        let reporter = CollectingReporter::default();
        let report = sign_files(
            signer.clone(),
            paths(&["one.msix", "two.msix", "three.msix"]),
            2,
            FailurePolicy::ContinueOnError {
                threshold: FailureThreshold::AllFailed,
            },
            &CancellationToken::new(),
            &reporter,
        )
        .await;

        assert_eq!(
            report.counts,
            MemberCounts {
                succeeded: 2,
                failed: 1
            }
        );
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].0, PathBuf::from("two.msix"));
        assert!(!report.cancelled);
        assert_eq!(signer.calls().len(), 3);
        assert!(reporter
            .events()
            .contains(&ResignEvent::MemberSigned {
                path: PathBuf::from("three.msix")
            }));
    }

    #[tokio::test]
    async fn test_fail_fast_stops_starting_files() {
        let signer = Arc::new(FakeSigner::failing_on("one"));
        let report = sign_files(
            signer.clone(),
            paths(&["one.msix", "two.msix", "three.msix"]),
            1,
            FailurePolicy::FailFast,
            &CancellationToken::new(),
            &CollectingReporter::default(),
        )
        .await;

        assert_eq!(report.counts.failed, 1);
        assert_eq!(report.counts.succeeded, 0);
        assert!(report.stopped_early);
        assert_eq!(signer.calls(), paths(&["one.msix"]));
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let signer = Arc::new(FakeSigner::default());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let report = sign_files(
            signer.clone(),
            paths(&["one.msix", "two.msix"]),
            4,
            FailurePolicy::FailFast,
            &cancel,
            &CollectingReporter::default(),
        )
        .await;

        assert!(report.cancelled);
        assert_eq!(report.counts.attempted(), 0);
        assert!(signer.calls().is_empty());
    }

    #[tokio::test]
    async fn test_no_files() {
        let report = sign_files(
            Arc::new(FakeSigner::default()),
            Vec::new(),
            worker_limit(None, 0),
            FailurePolicy::FailFast,
            &CancellationToken::new(),
            &CollectingReporter::default(),
        )
        .await;

        assert_eq!(report, BatchReport::default());
    }

    #[tokio::test]
    async fn test_panicking_worker_names_the_file() {
        let signer = Arc::new(FakeSigner::panicking_on("two"));
        let report = sign_files(
            signer.clone(),
            paths(&["one.msix", "two.msix", "three.msix"]),
            1,
            FailurePolicy::ContinueOnError {
                threshold: FailureThreshold::AnyFailed,
            },
            &CancellationToken::new(),
            &CollectingReporter::default(),
        )
        .await;

        assert_eq!(
            report.counts,
            MemberCounts {
                succeeded: 2,
                failed: 1
            }
        );
        assert_eq!(report.failures[0].0, PathBuf::from("two.msix"));
        assert!(report.failures[0].1.contains("panicked"));
        assert!(report.failures[0].1.contains("two.msix"));
    }

    #[tokio::test]
    async fn test_cancel_after_last_start_is_not_cancelled() {
        let cancel = CancellationToken::new();
        let signer = Arc::new(FakeSigner::cancelling(cancel.clone()));
        let report = sign_files(
            signer.clone(),
            paths(&["one.msix"]),
            1,
            FailurePolicy::FailFast,
            &cancel,
            &CollectingReporter::default(),
        )
        .await;

        assert!(cancel.is_cancelled());
        assert!(!report.cancelled);
        assert!(!report.stopped_early);
        assert_eq!(report.counts.succeeded, 1);
    }

    #[tokio::test]
    async fn test_cancel_while_signing_skips_the_rest() {
        let cancel = CancellationToken::new();
        let signer = Arc::new(FakeSigner::cancelling(cancel.clone()));
        let report = sign_files(
            signer.clone(),
            paths(&["one.msix", "two.msix", "three.msix"]),
            1,
            FailurePolicy::FailFast,
            &cancel,
            &CollectingReporter::default(),
        )
        .await;

        assert!(report.cancelled);
        assert_eq!(report.counts.succeeded, 1);
        assert_eq!(signer.calls(), paths(&["one.msix"]));
    }
}
