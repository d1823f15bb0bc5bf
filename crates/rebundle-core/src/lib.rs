//! Rebundle Core - Core library for bundle re-signing
//!
//! This crate provides configuration, error handling, the external process
//! runner, bundle archive handling and the resign pipeline that drives the
//! signing engine from `rebundle-signing`.

pub mod archive;
pub mod config;
pub mod error;
pub mod manifest;
pub mod packaging;
pub mod pipeline;
pub mod process;
pub mod reporter;

pub use config::{load_config, load_config_or_default, validate_config, Config};
pub use error::{ArchiveError, ConfigError, ResignError, Result};
pub use packaging::{locate_packaging_tool, MakeAppxRepackager, Repackager};
pub use pipeline::{
    sign_files, BatchReport, EngineSigner, FailurePolicy, FailureThreshold, FileSigner,
    MemberCounts, PipelineState, ResignOptions, ResignOutcome, ResignPipeline, ResignStatus,
};
pub use process::{ProcessResult, ProcessRunner};
pub use reporter::{CollectingReporter, ResignEvent, ResignReporter, TracingReporter};
