//! Bundle resign pipeline
//!
//! Extract the member packages, rewrite their publisher identity, sign each
//! member, rebuild the bundle with the packaging tool and sign the bundle.
//! Cancellation is observed before every stage and before every member
//! signing starts; a stage that is running is never interrupted.

mod members;
mod signer;
mod state;

#[cfg(test)]
pub(crate) mod test_support;

pub use members::{sign_files, worker_limit, BatchReport};
pub use signer::{EngineSigner, FileSigner};
pub use state::{FailurePolicy, FailureThreshold, MemberCounts, PipelineState};

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use crate::archive::{extract_members, rewrite_member_identity};
use crate::config::PipelineConfig;
use crate::error::{ArchiveError, Result};
use crate::packaging::{Repackager, PACKAGING_TOOL};
use crate::reporter::{ResignEvent, ResignReporter, TracingReporter};

/// Caller choices for one resign run
#[derive(Debug, Clone, Default)]
pub struct ResignOptions {
    /// Where the signed bundle goes; the input bundle when absent
    pub output: Option<PathBuf>,
    /// Publisher identity for the members; the certificate subject when absent
    pub publisher: Option<String>,
    /// Member signing failure policy
    pub policy: FailurePolicy,
    /// Concurrent member signings, see [`worker_limit`]
    pub max_degree_of_parallelism: Option<i64>,
    /// Parent of the staging directory; the system temp dir when absent
    pub work_dir: Option<PathBuf>,
}

impl ResignOptions {
    /// Options from the `pipeline` configuration section
    pub fn from_config(config: &PipelineConfig) -> Result<Self> {
        Ok(Self {
            output: None,
            publisher: config.publisher.clone(),
            policy: config.failure_policy()?,
            max_degree_of_parallelism: config.max_degree_of_parallelism,
            work_dir: config.work_dir.clone(),
        })
    }
}

/// How a run ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResignStatus {
    /// Every stage succeeded
    Succeeded,
    /// `stage` failed
    Failed { stage: PipelineState, reason: String },
    /// Cancellation was observed before `stage` (or one of its members)
    /// started
    Cancelled { stage: PipelineState },
}

impl std::fmt::Display for ResignStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed { stage, reason } => write!(f, "{} failed: {}", stage, reason),
            Self::Cancelled { stage } => write!(f, "cancelled at {}", stage),
        }
    }
}

/// Result of a resign run
#[derive(Debug, Clone)]
pub struct ResignOutcome {
    pub status: ResignStatus,
    /// Final state; `Completed` or `Failed`
    pub state: PipelineState,
    /// Member packages found in the bundle
    pub members: usize,
    /// Members whose identity was rewritten
    pub patched: usize,
    /// Member signing tallies
    pub counts: MemberCounts,
    /// The signed bundle, on success
    pub output: Option<PathBuf>,
    pub duration: Duration,
}

impl ResignOutcome {
    /// Whether the bundle was re-signed
    pub fn is_success(&self) -> bool {
        self.status == ResignStatus::Succeeded
    }

    /// Whether the run stopped because of cancellation
    pub fn is_cancelled(&self) -> bool {
        matches!(self.status, ResignStatus::Cancelled { .. })
    }
}

enum Stop {
    Failed { stage: PipelineState, reason: String },
    Cancelled { stage: PipelineState },
}

#[derive(Default)]
struct Progress {
    members: usize,
    patched: usize,
    counts: MemberCounts,
    output: Option<PathBuf>,
}

/// Re-signs bundles
pub struct ResignPipeline {
    signer: Arc<dyn FileSigner>,
    repackager: Arc<dyn Repackager>,
    reporter: Arc<dyn ResignReporter>,
    options: ResignOptions,
}

impl ResignPipeline {
    /// Pipeline reporting through tracing with default options
    pub fn new(signer: Arc<dyn FileSigner>, repackager: Arc<dyn Repackager>) -> Self {
        Self {
            signer,
            repackager,
            reporter: Arc::new(TracingReporter),
            options: ResignOptions::default(),
        }
    }

    /// Report progress to `reporter`
    pub fn with_reporter(mut self, reporter: Arc<dyn ResignReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    /// Use `options`
    pub fn with_options(mut self, options: ResignOptions) -> Self {
        self.options = options;
        self
    }

    /// Options in effect
    pub fn options(&self) -> &ResignOptions {
        &self.options
    }

    /// Re-sign `bundle`
    ///
    /// Never fails outright; every stop is described by the outcome. The
    /// staging directory is removed before returning.
    #[instrument(skip(self, cancel), fields(bundle = %bundle.display()))]
    pub async fn run(&self, bundle: &Path, cancel: &CancellationToken) -> ResignOutcome {
        let started = Instant::now();
        let mut progress = Progress::default();

        let (status, state) = match self.execute(bundle, cancel, &mut progress).await {
            Ok(()) => (ResignStatus::Succeeded, PipelineState::Completed),
            Err(Stop::Failed { stage, reason }) => {
                (ResignStatus::Failed { stage, reason }, PipelineState::Failed)
            }
            Err(Stop::Cancelled { stage }) => {
                self.reporter.report(&ResignEvent::Cancelled { stage });
                (ResignStatus::Cancelled { stage }, PipelineState::Failed)
            }
        };

        let outcome = ResignOutcome {
            status,
            state,
            members: progress.members,
            patched: progress.patched,
            counts: progress.counts,
            output: progress.output,
            duration: started.elapsed(),
        };
        self.reporter.report(&ResignEvent::Finished {
            state: outcome.state,
            succeeded: outcome.counts.succeeded,
            failed: outcome.counts.failed,
            duration: outcome.duration,
        });
        info!(status = %outcome.status, "Resign finished");
        outcome
    }

    async fn execute(
        &self,
        bundle: &Path,
        cancel: &CancellationToken,
        progress: &mut Progress,
    ) -> std::result::Result<(), Stop> {
        // Extracting
        let stage = PipelineState::Extracting;
        let stage_started = self.enter(stage, cancel)?;
        let Some(bundle_name) = bundle.file_name().filter(|_| bundle.is_file()) else {
            return Err(failed(stage, format!("bundle not found: {}", bundle.display())));
        };
        let staging = self.staging_dir().map_err(|e| failed(stage, e))?;
        let members_dir = staging.path().join("members");
        let output_dir = staging.path().join("out");
        for dir in [&members_dir, &output_dir] {
            std::fs::create_dir_all(dir).map_err(|e| failed(stage, e))?;
        }
        let members = {
            let bundle = bundle.to_path_buf();
            let dest = members_dir.clone();
            blocking(stage, move || extract_members(&bundle, &dest)).await?
        };
        progress.members = members.len();
        debug!(members = members.len(), staging = %staging.path().display(), "Extracted bundle");
        self.complete(stage, stage_started);

        // PatchingIdentity
        let stage = stage.next();
        let stage_started = self.enter(stage, cancel)?;
        let publisher = self
            .options
            .publisher
            .clone()
            .unwrap_or_else(|| self.signer.subject().to_string());
        let patched = {
            let members = members.clone();
            let publisher = publisher.clone();
            blocking(stage, move || {
                members
                    .into_iter()
                    .map(|member| -> std::result::Result<(PathBuf, bool), ArchiveError> {
                        let patched = rewrite_member_identity(&member, &publisher)?;
                        Ok((member, patched))
                    })
                    .collect::<std::result::Result<Vec<_>, _>>()
            })
            .await?
        };
        for (path, patched) in patched {
            if patched {
                progress.patched += 1;
            }
            self.reporter
                .report(&ResignEvent::MemberPatched { path, patched });
        }
        info!(
            publisher = %publisher,
            "Patched {} of {} members",
            progress.patched,
            progress.members
        );
        self.complete(stage, stage_started);

        // SigningMembers
        let stage = stage.next();
        let stage_started = self.enter(stage, cancel)?;
        let workers = worker_limit(self.options.max_degree_of_parallelism, members.len());
        let batch = sign_files(
            self.signer.clone(),
            members.clone(),
            workers,
            self.options.policy,
            cancel,
            self.reporter.as_ref(),
        )
        .await;
        progress.counts = batch.counts;
        if batch.cancelled && batch.counts.attempted() < members.len() {
            return Err(Stop::Cancelled { stage });
        }
        if self.options.policy.stage_failed(&batch.counts) {
            return Err(failed(
                stage,
                format!(
                    "{} of {} members failed to sign",
                    batch.counts.failed,
                    members.len()
                ),
            ));
        }
        self.complete(stage, stage_started);

        // Repackaging
        let stage = stage.next();
        let stage_started = self.enter(stage, cancel)?;
        let staged_bundle = output_dir.join(bundle_name);
        let result = self.repackager.repackage(&staged_bundle, &members_dir).await;
        self.reporter.report(&ResignEvent::ToolOutput {
            tool: PACKAGING_TOOL.to_string(),
            output: result.output.clone(),
            success: result.succeeded(),
        });
        if !result.completed {
            return Err(failed(stage, "packaging tool did not complete"));
        }
        if result.exit_code != 0 {
            return Err(failed(
                stage,
                format!("packaging tool exited with code {}", result.exit_code),
            ));
        }
        if !staged_bundle.is_file() {
            return Err(failed(stage, "packaging tool produced no bundle"));
        }
        self.complete(stage, stage_started);

        // SigningBundle
        let stage = stage.next();
        let stage_started = self.enter(stage, cancel)?;
        {
            let signer = self.signer.clone();
            let staged_bundle = staged_bundle.clone();
            blocking(stage, move || signer.sign_file(&staged_bundle)).await?;
        }
        let output = self
            .options
            .output
            .clone()
            .unwrap_or_else(|| bundle.to_path_buf());
        tokio::fs::copy(&staged_bundle, &output)
            .await
            .map_err(|e| failed(stage, format!("writing {}: {}", output.display(), e)))?;
        progress.output = Some(output);
        self.complete(stage, stage_started);

        Ok(())
    }

    fn enter(&self, stage: PipelineState, cancel: &CancellationToken) -> std::result::Result<Instant, Stop> {
        if cancel.is_cancelled() {
            return Err(Stop::Cancelled { stage });
        }
        debug!(stage = ?stage, "Pipeline transition");
        self.reporter.report(&ResignEvent::StageStarted { stage });
        Ok(Instant::now())
    }

    fn complete(&self, stage: PipelineState, started: Instant) {
        self.reporter.report(&ResignEvent::StageCompleted {
            stage,
            duration: started.elapsed(),
        });
    }

    fn staging_dir(&self) -> std::io::Result<tempfile::TempDir> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("rebundle-");
        match &self.options.work_dir {
            Some(dir) => {
                std::fs::create_dir_all(dir)?;
                builder.tempdir_in(dir)
            }
            None => builder.tempdir(),
        }
    }
}

impl std::fmt::Debug for ResignPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResignPipeline")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

fn failed(stage: PipelineState, reason: impl ToString) -> Stop {
    Stop::Failed {
        stage,
        reason: reason.to_string(),
    }
}

/// Run blocking stage work off the async threads
async fn blocking<T, E, F>(stage: PipelineState, work: F) -> std::result::Result<T, Stop>
where
    F: FnOnce() -> std::result::Result<T, E> + Send + 'static,
    T: Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    match tokio::task::spawn_blocking(work).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(failed(stage, e)),
        Err(e) => Err(failed(stage, format!("worker failed: {}", e))),
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::FakeSigner;
    use super::*;
    use crate::archive::test_fixtures;
    use crate::archive::MANIFEST_ENTRY;
    use crate::manifest::extract_xml_attr;
    use crate::process::ProcessResult;
    use crate::reporter::CollectingReporter;
    use async_trait::async_trait;
    use std::io::Read;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Writes a placeholder bundle and remembers the publishers it saw
    #[derive(Default)]
    struct FakeRepackager {
        exit_code: i32,
        calls: Mutex<Vec<PathBuf>>,
        publishers: Mutex<Vec<String>>,
    }

    impl FakeRepackager {
        fn failing(exit_code: i32) -> Self {
            Self {
                exit_code,
                ..Default::default()
            }
        }

        fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl Repackager for FakeRepackager {
        async fn repackage(&self, bundle: &Path, members_dir: &Path) -> ProcessResult {
            self.calls.lock().unwrap().push(bundle.to_path_buf());
            for entry in std::fs::read_dir(members_dir).unwrap() {
                let file = std::fs::File::open(entry.unwrap().path()).unwrap();
                let mut archive = zip::ZipArchive::new(file).unwrap();
                let mut manifest = String::new();
                archive
                    .by_name(MANIFEST_ENTRY)
                    .unwrap()
                    .read_to_string(&mut manifest)
                    .unwrap();
                if let Some(publisher) = extract_xml_attr(&manifest, "Identity", "Publisher") {
                    self.publishers.lock().unwrap().push(publisher);
                }
            }
            if self.exit_code == 0 {
                std::fs::write(bundle, b"repacked").unwrap();
            }
            ProcessResult {
                completed: true,
                exit_code: self.exit_code,
                output: "Package creation succeeded.".to_string(),
            }
        }
    }

    /// Raises cancellation once `stage` completes
    struct CancelAfter {
        stage: PipelineState,
        token: CancellationToken,
        inner: CollectingReporter,
    }

    impl ResignReporter for CancelAfter {
        fn report(&self, event: &ResignEvent) {
            self.inner.report(event);
            if let ResignEvent::StageCompleted { stage, .. } = event {
                if *stage == self.stage {
                    self.token.cancel();
                }
            }
        }
    }

    struct Fixture {
        temp: TempDir,
        bundle: PathBuf,
        output: PathBuf,
    }

    fn fixture(members: &[&str]) -> Fixture {
        let temp = TempDir::new().unwrap();
        let bundle = temp.path().join("Contoso.msixbundle");
        test_fixtures::bundle(&bundle, members);
        let output = temp.path().join("signed.msixbundle");
        Fixture {
            temp,
            bundle,
            output,
        }
    }

    fn options(fixture: &Fixture, policy: FailurePolicy) -> ResignOptions {
        ResignOptions {
            output: Some(fixture.output.clone()),
            policy,
            work_dir: Some(fixture.temp.path().join("work")),
            ..Default::default()
        }
    }

    const THREE: &[&str] = &["one.appx", "two.appx", "three.appx"];

    fn continue_on(threshold: FailureThreshold) -> FailurePolicy {
        FailurePolicy::ContinueOnError { threshold }
    }

    #[tokio::test]
    async fn test_resign_bundle() {
        let fixture = fixture(THREE);
        let signer = Arc::new(FakeSigner::default());
        let repackager = Arc::new(FakeRepackager::default());
        let reporter = Arc::new(CollectingReporter::default());

        let pipeline = ResignPipeline::new(signer.clone(), repackager.clone())
            .with_reporter(reporter.clone())
            .with_options(options(&fixture, FailurePolicy::FailFast));
        let outcome = pipeline.run(&fixture.bundle, &CancellationToken::new()).await;

        assert!(outcome.is_success(), "{:?}", outcome.status);
        assert_eq!(outcome.state, PipelineState::Completed);
        assert_eq!(outcome.members, 3);
        assert_eq!(outcome.patched, 3);
        assert_eq!(
            outcome.counts,
            MemberCounts {
                succeeded: 3,
                failed: 0
            }
        );
        assert_eq!(outcome.output.as_deref(), Some(fixture.output.as_path()));
        assert_eq!(std::fs::read(&fixture.output).unwrap(), b"repacked");

        assert_eq!(
            signer.signed_names(),
            vec!["Contoso.msixbundle", "one.appx", "three.appx", "two.appx"]
        );
        assert_eq!(
            *repackager.publishers.lock().unwrap(),
            vec!["CN=Fake Publisher, O=Contoso".to_string(); 3]
        );
        assert_eq!(
            reporter.started_stages(),
            vec![
                PipelineState::Extracting,
                PipelineState::PatchingIdentity,
                PipelineState::SigningMembers,
                PipelineState::Repackaging,
                PipelineState::SigningBundle,
            ]
        );
    }

    #[tokio::test]
    async fn test_publisher_override() {
        let fixture = fixture(&["one.appx"]);
        let repackager = Arc::new(FakeRepackager::default());
        let mut opts = options(&fixture, FailurePolicy::FailFast);
        opts.publisher = Some("CN=Override".to_string());

        let outcome = ResignPipeline::new(Arc::new(FakeSigner::default()), repackager.clone())
            .with_options(opts)
            .run(&fixture.bundle, &CancellationToken::new())
            .await;

        assert!(outcome.is_success());
        assert_eq!(*repackager.publishers.lock().unwrap(), vec!["CN=Override".to_string()]);
    }

    #[tokio::test]
    async fn test_any_failed_threshold_fails_stage() {
        let fixture = fixture(THREE);
        let repackager = Arc::new(FakeRepackager::default());

        let outcome = ResignPipeline::new(Arc::new(FakeSigner::failing_on("two")), repackager.clone())
            .with_options(options(&fixture, continue_on(FailureThreshold::AnyFailed)))
            .run(&fixture.bundle, &CancellationToken::new())
            .await;

        assert_eq!(outcome.state, PipelineState::Failed);
        assert!(matches!(
            outcome.status,
            ResignStatus::Failed {
                stage: PipelineState::SigningMembers,
                ..
            }
        ));
        assert_eq!(
            outcome.counts,
            MemberCounts {
                succeeded: 2,
                failed: 1
            }
        );
        assert_eq!(repackager.call_count(), 0);
        assert!(!fixture.output.exists());
    }

    #[tokio::test]
    async fn test_all_failed_threshold_tolerates_partial_failure() {
        let fixture = fixture(THREE);
        let repackager = Arc::new(FakeRepackager::default());

        let outcome = ResignPipeline::new(Arc::new(FakeSigner::failing_on("two")), repackager.clone())
            .with_options(options(&fixture, continue_on(FailureThreshold::AllFailed)))
            .run(&fixture.bundle, &CancellationToken::new())
            .await;

        assert!(outcome.is_success());
        assert_eq!(outcome.state, PipelineState::Completed);
        assert_eq!(
            outcome.counts,
            MemberCounts {
                succeeded: 2,
                failed: 1
            }
        );
        assert_eq!(repackager.call_count(), 1);
    }

    #[tokio::test]
    async fn test_fail_fast() {
        let fixture = fixture(THREE);
        let signer = Arc::new(FakeSigner::failing_on("one"));
        let mut opts = options(&fixture, FailurePolicy::FailFast);
        opts.max_degree_of_parallelism = Some(1);

        let outcome = ResignPipeline::new(signer.clone(), Arc::new(FakeRepackager::default()))
            .with_options(opts)
            .run(&fixture.bundle, &CancellationToken::new())
            .await;

        assert!(matches!(
            outcome.status,
            ResignStatus::Failed {
                stage: PipelineState::SigningMembers,
                ..
            }
        ));
        assert_eq!(outcome.counts.failed, 1);
        assert_eq!(signer.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_cancel_before_repackaging() {
        let fixture = fixture(THREE);
        let repackager = Arc::new(FakeRepackager::default());
        let token = CancellationToken::new();
        let reporter = Arc::new(CancelAfter {
            stage: PipelineState::SigningMembers,
            token: token.clone(),
            inner: CollectingReporter::default(),
        });

        let outcome = ResignPipeline::new(Arc::new(FakeSigner::default()), repackager.clone())
            .with_reporter(reporter.clone())
            .with_options(options(&fixture, FailurePolicy::FailFast))
            .run(&fixture.bundle, &token)
            .await;

        assert!(outcome.is_cancelled());
        assert_eq!(
            outcome.status,
            ResignStatus::Cancelled {
                stage: PipelineState::Repackaging
            }
        );
        assert_eq!(outcome.state, PipelineState::Failed);
        assert_eq!(outcome.counts.succeeded, 3);
        assert_eq!(repackager.call_count(), 0);
        assert!(reporter.inner.events().contains(&ResignEvent::Cancelled {
            stage: PipelineState::Repackaging
        }));
    }

    #[tokio::test]
    async fn test_cancel_before_start() {
        let fixture = fixture(THREE);
        let signer = Arc::new(FakeSigner::default());
        let token = CancellationToken::new();
        token.cancel();

        let outcome = ResignPipeline::new(signer.clone(), Arc::new(FakeRepackager::default()))
            .with_options(options(&fixture, FailurePolicy::FailFast))
            .run(&fixture.bundle, &token)
            .await;

        assert_eq!(
            outcome.status,
            ResignStatus::Cancelled {
                stage: PipelineState::Extracting
            }
        );
        assert!(signer.calls().is_empty());
    }

    #[tokio::test]
    async fn test_repackaging_failure_leaves_input_untouched() {
        let fixture = fixture(THREE);
        let original = std::fs::read(&fixture.bundle).unwrap();
        let mut opts = options(&fixture, FailurePolicy::FailFast);
        opts.output = None;

        let outcome = ResignPipeline::new(
            Arc::new(FakeSigner::default()),
            Arc::new(FakeRepackager::failing(2)),
        )
        .with_options(opts)
        .run(&fixture.bundle, &CancellationToken::new())
        .await;

        match outcome.status {
            ResignStatus::Failed { stage, reason } => {
                assert_eq!(stage, PipelineState::Repackaging);
                assert!(reason.contains("code 2"));
            }
            other => panic!("expected repackaging failure, got {:?}", other),
        }
        assert_eq!(std::fs::read(&fixture.bundle).unwrap(), original);
    }

    #[tokio::test]
    async fn test_output_defaults_to_input() {
        let fixture = fixture(&["one.appx"]);
        let mut opts = options(&fixture, FailurePolicy::FailFast);
        opts.output = None;

        let outcome = ResignPipeline::new(
            Arc::new(FakeSigner::default()),
            Arc::new(FakeRepackager::default()),
        )
        .with_options(opts)
        .run(&fixture.bundle, &CancellationToken::new())
        .await;

        assert!(outcome.is_success());
        assert_eq!(std::fs::read(&fixture.bundle).unwrap(), b"repacked");
    }

    #[tokio::test]
    async fn test_bundle_without_members() {
        let fixture = fixture(&[]);

        let outcome = ResignPipeline::new(
            Arc::new(FakeSigner::default()),
            Arc::new(FakeRepackager::default()),
        )
        .with_options(options(&fixture, FailurePolicy::FailFast))
        .run(&fixture.bundle, &CancellationToken::new())
        .await;

        assert!(matches!(
            outcome.status,
            ResignStatus::Failed {
                stage: PipelineState::Extracting,
                ..
            }
        ));
        assert_eq!(outcome.members, 0);
    }

    #[tokio::test]
    async fn test_staging_directory_is_removed() {
        let fixture = fixture(THREE);
        let work = fixture.temp.path().join("work");

        let outcome = ResignPipeline::new(
            Arc::new(FakeSigner::failing_on("three")),
            Arc::new(FakeRepackager::default()),
        )
        .with_options(options(&fixture, FailurePolicy::FailFast))
        .run(&fixture.bundle, &CancellationToken::new())
        .await;

        assert!(!outcome.is_success());
        assert_eq!(std::fs::read_dir(&work).unwrap().count(), 0);
    }

    #[test]
    fn test_options_from_config() {
        let config = PipelineConfig {
            publisher: Some("CN=Configured".to_string()),
            continue_on_error: true,
            failure_threshold: "any".to_string(),
            max_degree_of_parallelism: Some(4),
            ..Default::default()
        };

        let options = ResignOptions::from_config(&config).unwrap();
        assert_eq!(options.publisher.as_deref(), Some("CN=Configured"));
        assert_eq!(options.policy, continue_on(FailureThreshold::AnyFailed));
        assert_eq!(options.max_degree_of_parallelism, Some(4));
        assert!(options.output.is_none());
    }
}
