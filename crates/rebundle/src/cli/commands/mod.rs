//! CLI commands

mod common;
mod resign;
mod sign;

pub use resign::ResignCommand;
pub use sign::SignCommand;
