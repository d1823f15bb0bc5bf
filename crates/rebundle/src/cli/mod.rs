//! CLI definition and command handling

pub mod commands;
pub mod output;

use clap::{Parser, Subcommand};

use commands::{ResignCommand, SignCommand};

/// Rebundle - re-sign app bundles with a remotely held key
#[derive(Debug, Parser)]
#[command(name = "rebundle")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress output except errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Output format
    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,

    /// Working directory
    #[arg(short = 'C', long, global = true)]
    pub directory: Option<std::path::PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Output format for CLI
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output
    #[default]
    Text,
    /// JSON output
    Json,
}

/// Available commands
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Re-sign a bundle and every package inside it
    Resign(ResignCommand),

    /// Sign files in place
    Sign(SignCommand),
}

impl Cli {
    /// Execute the CLI command, returning the process exit code
    pub fn execute(self) -> anyhow::Result<i32> {
        if let Some(dir) = &self.directory {
            std::env::set_current_dir(dir)?;
        }

        match self.command {
            Commands::Resign(ref cmd) => cmd.execute(&self),
            Commands::Sign(ref cmd) => cmd.execute(&self),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_definition() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_resign() {
        let cli = Cli::try_parse_from([
            "rebundle",
            "resign",
            "app.msixbundle",
            "--continue-on-error",
            "--failure-threshold",
            "any",
            "--max-degree-of-parallelism",
            "2",
            "--key-vault-url",
            "https://vault.example.com",
            "--certificate-name",
            "codesign",
        ])
        .unwrap();

        match cli.command {
            Commands::Resign(cmd) => {
                assert_eq!(cmd.bundle, std::path::PathBuf::from("app.msixbundle"));
                assert!(cmd.continue_on_error);
                assert_eq!(cmd.max_degree_of_parallelism, Some(2));
                assert_eq!(
                    cmd.signing.key_vault_url.as_deref(),
                    Some("https://vault.example.com")
                );
            }
            other => panic!("expected resign, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_sign_negative_parallelism() {
        let cli = Cli::try_parse_from([
            "rebundle",
            "sign",
            "a.exe",
            "b.msix",
            "--max-degree-of-parallelism=-1",
            "--quiet",
            "--format",
            "json",
        ])
        .unwrap();

        assert!(cli.quiet);
        assert_eq!(cli.format, OutputFormat::Json);
        match cli.command {
            Commands::Sign(cmd) => {
                assert_eq!(cmd.files.len(), 2);
                assert_eq!(cmd.max_degree_of_parallelism, Some(-1));
            }
            other => panic!("expected sign, got {:?}", other),
        }
    }
}
