//! Sign command

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::Args;

use rebundle_core::pipeline::worker_limit;
use rebundle_core::{sign_files, TracingReporter};

use super::common::{build_signer, cancel_on_ctrl_c, SigningArgs};
use crate::cli::{output, Cli, OutputFormat};
use crate::exit_codes;

/// Sign files in place
#[derive(Debug, Args)]
pub struct SignCommand {
    /// Files to sign
    #[arg(required_unless_present = "input_file_list")]
    pub files: Vec<PathBuf>,

    /// File listing paths to sign, one per line
    #[arg(long)]
    pub input_file_list: Option<PathBuf>,

    /// Keep signing after a failure
    #[arg(long)]
    pub continue_on_error: bool,

    /// Concurrent signings (0 or negative: system default)
    #[arg(long, allow_negative_numbers = true)]
    pub max_degree_of_parallelism: Option<i64>,

    #[command(flatten)]
    pub signing: SigningArgs,
}

impl SignCommand {
    /// Execute the sign command
    pub fn execute(&self, cli: &Cli) -> anyhow::Result<i32> {
        let cwd = std::env::current_dir()?;
        let mut config = self.signing.load_config(&cwd)?;
        if self.continue_on_error {
            config.pipeline.continue_on_error = true;
        }
        if self.max_degree_of_parallelism.is_some() {
            config.pipeline.max_degree_of_parallelism = self.max_degree_of_parallelism;
        }

        let files = self.collect_files()?;
        if files.is_empty() {
            anyhow::bail!("No files to sign");
        }
        if let Some(missing) = files.iter().find(|f| !f.is_file()) {
            anyhow::bail!("File not found: {}", missing.display());
        }

        let signer = Arc::new(build_signer(&config)?);
        let policy = config.pipeline.failure_policy()?;
        let workers = worker_limit(config.pipeline.max_degree_of_parallelism, files.len());
        let total = files.len();

        let rt = tokio::runtime::Runtime::new()?;
        let report = rt.block_on(async {
            let cancel = cancel_on_ctrl_c();
            sign_files(
                signer.clone(),
                files,
                workers,
                policy,
                &cancel,
                &TracingReporter,
            )
            .await
        });
        drop(rt);
        drop(signer);

        let stage_failed = policy.stage_failed(&report.counts);
        let code = exit_codes::for_batch(&report);
        if cli.format == OutputFormat::Json {
            let failures: Vec<_> = report
                .failures
                .iter()
                .map(|(path, error)| serde_json::json!({ "path": path, "error": error }))
                .collect();
            let summary = serde_json::json!({
                "total": total,
                "counts": report.counts,
                "failures": failures,
                "cancelled": report.cancelled,
                "stage_failed": stage_failed,
                "success": code == exit_codes::SUCCESS,
            });
            println!("{}", serde_json::to_string_pretty(&summary)?);
        } else if !cli.quiet {
            for (path, error) in &report.failures {
                output::error(&format!("{}: {}", path.display(), error));
            }
            if report.cancelled {
                output::warning(&format!(
                    "Cancelled after {} of {} files",
                    report.counts.attempted(),
                    total
                ));
            } else if stage_failed {
                output::error(&output::counts(report.counts.succeeded, report.counts.failed));
            } else if report.counts.failed > 0 {
                output::warning(&output::counts(report.counts.succeeded, report.counts.failed));
            } else {
                output::success(&output::counts(report.counts.succeeded, report.counts.failed));
            }
        }

        Ok(code)
    }

    fn collect_files(&self) -> anyhow::Result<Vec<PathBuf>> {
        let mut files = self.files.clone();
        if let Some(list) = &self.input_file_list {
            files.extend(read_file_list(list)?);
        }
        Ok(files)
    }
}

/// Paths listed one per line; blank lines and `#` comments are skipped
fn read_file_list(path: &Path) -> anyhow::Result<Vec<PathBuf>> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("Failed to read {}: {}", path.display(), e))?;
    Ok(content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(PathBuf::from)
        .collect())
}
