pub mod catalog;
pub mod config;
pub mod core;
pub mod defines;
pub mod discovery;
pub mod error;
pub mod events;
pub mod guard;
pub mod log_batcher;
pub mod orchestrator;
pub mod process;
pub mod server;
pub mod source;
pub mod toolchain;

use crate::core::{BuildRequest, BuildResult};
use async_trait::async_trait;

pub use crate::orchestrator::{BuildOrchestrator, PipelineState};

/// Accepts build requests, one at a time.
#[async_trait]
pub trait BuildRunner: Send + Sync {
    /// Runs the request to completion, or rejects it at once if a build is
    /// already in flight.
    async fn submit_build(&self, request: &BuildRequest) -> BuildResult;

    fn is_busy(&self) -> bool;
}
