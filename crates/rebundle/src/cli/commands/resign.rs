//! Resign command

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Args;
use console::style;
use tracing::info;

use rebundle_core::config::Config;
use rebundle_core::{
    locate_packaging_tool, MakeAppxRepackager, ResignOptions, ResignPipeline, ResignStatus,
};

use super::common::{build_signer, cancel_on_ctrl_c, SigningArgs};
use crate::cli::{output, Cli, OutputFormat};
use crate::exit_codes;

/// Re-sign a bundle and every package inside it
#[derive(Debug, Args)]
pub struct ResignCommand {
    /// Bundle to re-sign
    #[arg(required = true)]
    pub bundle: PathBuf,

    /// Where to write the signed bundle (defaults to overwriting the input)
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Publisher identity for the member packages (defaults to the
    /// certificate subject)
    #[arg(long)]
    pub publisher: Option<String>,

    /// Keep signing members after a failure
    #[arg(long)]
    pub continue_on_error: bool,

    /// With --continue-on-error, fail when any member fails or only when all do
    #[arg(long, value_parser = ["any", "all"])]
    pub failure_threshold: Option<String>,

    /// Concurrent member signings (0 or negative: system default)
    #[arg(long, allow_negative_numbers = true)]
    pub max_degree_of_parallelism: Option<i64>,

    /// Path to makeappx
    #[arg(long)]
    pub packaging_tool: Option<PathBuf>,

    /// Packaging tool timeout in seconds
    #[arg(long, value_name = "SECS")]
    pub tool_timeout: Option<u64>,

    #[command(flatten)]
    pub signing: SigningArgs,
}

impl ResignCommand {
    /// Execute the resign command
    pub fn execute(&self, cli: &Cli) -> anyhow::Result<i32> {
        let cwd = std::env::current_dir()?;
        let mut config = self.signing.load_config(&cwd)?;
        self.apply(&mut config);

        let signer = Arc::new(build_signer(&config)?);
        let tool = locate_packaging_tool(config.pipeline.packaging_tool.as_deref())?;
        info!(tool = %tool.display(), "Using packaging tool");
        let repackager = Arc::new(MakeAppxRepackager::new(
            tool,
            Duration::from_secs(config.pipeline.tool_timeout_secs),
        ));

        let mut options = ResignOptions::from_config(&config.pipeline)?;
        options.output = self.output.clone();

        let text = cli.format == OutputFormat::Text;
        if text && !cli.quiet {
            output::info(&format!(
                "Re-signing {}",
                output::path_style().apply_to(self.bundle.display())
            ));
        }

        let pipeline = ResignPipeline::new(signer.clone(), repackager).with_options(options);
        let rt = tokio::runtime::Runtime::new()?;
        let outcome = rt.block_on(async {
            let cancel = cancel_on_ctrl_c();
            pipeline.run(&self.bundle, &cancel).await
        });
        drop(pipeline);
        drop(rt);
        // Last reference to the Key Vault client goes away outside the runtime
        drop(signer);

        if !text {
            let (stage, reason) = match &outcome.status {
                ResignStatus::Succeeded => (None, None),
                ResignStatus::Cancelled { stage } => (Some(*stage), None),
                ResignStatus::Failed { stage, reason } => (Some(*stage), Some(reason.as_str())),
            };
            let report = serde_json::json!({
                "bundle": self.bundle,
                "success": outcome.is_success(),
                "cancelled": outcome.is_cancelled(),
                "state": outcome.state,
                "stage": stage,
                "reason": reason,
                "members": outcome.members,
                "patched": outcome.patched,
                "counts": outcome.counts,
                "output": outcome.output,
                "duration_secs": outcome.duration.as_secs_f64(),
            });
            println!("{}", serde_json::to_string_pretty(&report)?);
            return Ok(exit_codes::for_outcome(&outcome));
        }

        if !cli.quiet {
            println!(
                "{}",
                output::key_value("Members", &outcome.members.to_string())
            );
            println!(
                "{}",
                output::key_value("Patched", &outcome.patched.to_string())
            );
            println!(
                "{}",
                output::key_value(
                    "Signed",
                    &output::counts(outcome.counts.succeeded, outcome.counts.failed)
                )
            );
        }

        match &outcome.status {
            ResignStatus::Succeeded => {
                if !cli.quiet {
                    let written = outcome.output.as_ref().unwrap_or(&self.bundle);
                    output::success(&format!(
                        "Re-signed {} in {:.1}s",
                        style(written.display()).cyan(),
                        outcome.duration.as_secs_f64()
                    ));
                }
            }
            ResignStatus::Cancelled { stage } => {
                output::warning(&format!("Cancelled before {}", stage));
            }
            ResignStatus::Failed { stage, reason } => {
                output::error(&format!("{} failed: {}", stage, reason));
            }
        }

        Ok(exit_codes::for_outcome(&outcome))
    }

    fn apply(&self, config: &mut Config) {
        let pipeline = &mut config.pipeline;
        if self.publisher.is_some() {
            pipeline.publisher = self.publisher.clone();
        }
        if self.continue_on_error {
            pipeline.continue_on_error = true;
        }
        if let Some(threshold) = &self.failure_threshold {
            pipeline.failure_threshold = threshold.clone();
        }
        if self.max_degree_of_parallelism.is_some() {
            pipeline.max_degree_of_parallelism = self.max_degree_of_parallelism;
        }
        if self.packaging_tool.is_some() {
            pipeline.packaging_tool = self.packaging_tool.clone();
        }
        if let Some(timeout) = self.tool_timeout {
            pipeline.tool_timeout_secs = timeout;
        }
    }
}
