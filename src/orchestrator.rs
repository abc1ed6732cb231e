use crate::config::RunnerConfig;
use crate::core::{
    BuildJobType, BuildRequest, BuildResult, BuildStep, ErrorKind, ProgressEvent, SourceLocation,
    UserDefinesMode,
};
use crate::defines;
use crate::error::{DefineError, SourceError};
use crate::events::EventBus;
use crate::guard::SingleFlightGuard;
use crate::log_batcher::LogBatcher;
use crate::process::{sink_from_fn, CommandOutput, OutputSink};
use crate::source::{GitSourceResolver, SourceResolver};
use crate::toolchain::{PlatformioToolchain, ToolchainBackend};
use crate::BuildRunner;
use async_trait::async_trait;
use futures::FutureExt;
use parking_lot::Mutex;
use serde::Serialize;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

pub const BUSY_MESSAGE: &str = "a build is already in progress";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PipelineState {
    Idle,
    CheckingPrerequisites,
    ResolvingSource,
    CheckingDefineCompatibility,
    MaterializingDefines,
    Compiling,
    Flashing,
    Failed(ErrorKind),
}

impl PipelineState {
    /// The progress step a state reports under.
    fn step(self) -> Option<BuildStep> {
        match self {
            PipelineState::CheckingPrerequisites => Some(BuildStep::VerifyingBuildSystem),
            PipelineState::ResolvingSource => Some(BuildStep::DownloadingFirmware),
            PipelineState::CheckingDefineCompatibility | PipelineState::MaterializingDefines => {
                Some(BuildStep::BuildingUserDefines)
            }
            PipelineState::Compiling => Some(BuildStep::BuildingFirmware),
            PipelineState::Flashing => Some(BuildStep::FlashingFirmware),
            PipelineState::Idle | PipelineState::Failed(_) => None,
        }
    }
}

#[derive(Debug, Error)]
enum PipelineError {
    #[error("Python is not available:\n{0}")]
    Python(String),

    #[error("PlatformIO could not be installed:\n{0}")]
    Platformio(String),

    #[error("{0}")]
    Git(String),

    #[error("invalid firmware source: {0}")]
    InvalidSource(SourceError),

    #[error("failed to download firmware: {0}")]
    Source(SourceError),

    #[error("user defines not supported by this firmware: {}", .0.join(", "))]
    IncompatibleDefines(Vec<String>),

    #[error("invalid user defines: {0}")]
    Defines(#[from] DefineError),

    #[error("{0}")]
    Compile(String),

    #[error("target {0} requires a serial device but none was selected")]
    MissingDevice(String),

    #[error("{0}")]
    Flash(String),

    #[error("{0:#}")]
    Backend(anyhow::Error),
}

impl From<anyhow::Error> for PipelineError {
    fn from(e: anyhow::Error) -> Self {
        PipelineError::Backend(e)
    }
}

impl PipelineError {
    fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::Python(_) => ErrorKind::PythonDependencyError,
            PipelineError::Platformio(_) => ErrorKind::PlatformioDependencyError,
            PipelineError::Git(_) => ErrorKind::GitDependencyError,
            PipelineError::IncompatibleDefines(_)
            | PipelineError::Defines(_)
            | PipelineError::Compile(_) => ErrorKind::BuildError,
            PipelineError::MissingDevice(_) | PipelineError::Flash(_) => ErrorKind::FlashError,
            PipelineError::InvalidSource(_)
            | PipelineError::Source(_)
            | PipelineError::Backend(_) => ErrorKind::GenericError,
        }
    }
}

/// Runs build requests one at a time and reports progress on the event bus.
pub struct BuildOrchestrator {
    toolchain: Arc<dyn ToolchainBackend>,
    resolver: Arc<dyn SourceResolver>,
    bus: EventBus,
    batcher: Arc<LogBatcher>,
    guard: SingleFlightGuard,
    state: Mutex<PipelineState>,
}

impl BuildOrchestrator {
    pub fn new(
        toolchain: Arc<dyn ToolchainBackend>,
        resolver: Arc<dyn SourceResolver>,
        bus: EventBus,
    ) -> Self {
        Self {
            toolchain,
            resolver,
            batcher: Arc::new(LogBatcher::new(bus.clone())),
            bus,
            guard: SingleFlightGuard::new(),
            state: Mutex::new(PipelineState::Idle),
        }
    }

    /// PlatformIO toolchain plus git checkouts under the configured cache.
    pub fn from_config(config: &RunnerConfig, bus: EventBus) -> Self {
        let mut resolver = GitSourceResolver::new(&config.cache_dir);
        if let Some(git) = &config.git {
            resolver = resolver.with_git_binary(git);
        }
        Self::new(
            Arc::new(PlatformioToolchain::new(&config.python)),
            Arc::new(resolver),
            bus,
        )
    }

    /// Starts periodic log flushing. Needs a tokio runtime.
    pub fn start_log_ticker(&self, interval: Duration) {
        self.batcher.spawn_ticker(interval);
    }

    pub fn events(&self) -> &EventBus {
        &self.bus
    }

    pub fn state(&self) -> PipelineState {
        *self.state.lock()
    }

    pub fn is_busy(&self) -> bool {
        self.guard.is_held()
    }

    pub async fn submit_build(&self, request: &BuildRequest) -> BuildResult {
        // Checked before the first await so back-to-back submissions cannot both pass.
        let Some(_permit) = self.guard.try_acquire() else {
            warn!("Rejecting build for {}: {}", request.target.name, BUSY_MESSAGE);
            return BuildResult::failed(ErrorKind::GenericError, BUSY_MESSAGE);
        };

        let build_id = Uuid::new_v4();
        let span = info_span!("build", %build_id, target = %request.target.name);
        let started = Instant::now();

        let outcome = AssertUnwindSafe(self.run_pipeline(request))
            .catch_unwind()
            .instrument(span.clone())
            .await;
        self.batcher.flush();

        let result = span.in_scope(|| match outcome {
            Ok(Ok(result)) => {
                info!("Build finished in {:?}", started.elapsed());
                result
            }
            Ok(Err(e)) => {
                let kind = e.kind();
                error!("Build failed ({:?}): {}", kind, e);
                self.report_failure(kind);
                BuildResult::failed(kind, e.to_string())
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!("Build pipeline panicked: {}", message);
                self.report_failure(ErrorKind::GenericError);
                BuildResult::failed(ErrorKind::GenericError, message)
            }
        });

        *self.state.lock() = PipelineState::Idle;
        result.with_duration(started.elapsed().as_millis() as u64)
    }

    async fn run_pipeline(&self, request: &BuildRequest) -> Result<BuildResult, PipelineError> {
        // Reject malformed sources before anything touches the network.
        request
            .firmware_source
            .validate()
            .map_err(PipelineError::InvalidSource)?;

        self.enter(PipelineState::CheckingPrerequisites);
        self.verify_build_system().await?;

        let location = request.firmware_source.location();
        let git = match &location {
            SourceLocation::Git(_) => Some(
                self.resolver
                    .locate_git()
                    .map_err(|e| PipelineError::Git(e.to_string()))?,
            ),
            SourceLocation::Local(_) => None,
        };

        self.enter(PipelineState::ResolvingSource);
        let source_path = match (location, git) {
            (SourceLocation::Local(path), _) => {
                info!("Using local firmware sources at {:?}", path);
                path
            }
            (SourceLocation::Git(git_ref), Some(git)) => self
                .resolver
                .checkout(&git, &request.repository, &git_ref, self.sink())
                .await
                .map_err(PipelineError::Source)?,
            (SourceLocation::Git(git_ref), None) => {
                return Err(PipelineError::Git(format!("no git executable to check out {}", git_ref)))
            }
        };

        self.enter(PipelineState::CheckingDefineCompatibility);
        let defines_text = match request.user_defines_mode {
            UserDefinesMode::Manual => request.user_defines_text.clone(),
            UserDefinesMode::UserInterface => {
                let keys = defines::enabled_keys(&request.user_defines);
                let compatibility = self
                    .toolchain
                    .check_define_compatibility(&source_path, &keys)
                    .await?;
                if !compatibility.compatible {
                    return Err(PipelineError::IncompatibleDefines(
                        compatibility.incompatible_keys,
                    ));
                }
                self.set_state(PipelineState::MaterializingDefines);
                defines::materialize(&request.user_defines)?
            }
        };

        self.enter(PipelineState::Compiling);
        let output = self
            .toolchain
            .compile(&request.target, &defines_text, &source_path, self.sink())
            .await?;
        if !output.success {
            return Err(PipelineError::Compile(output.diagnostics().to_string()));
        }

        match request.job_type {
            BuildJobType::Build => {
                let binary = self
                    .toolchain
                    .get_binary_path(&request.target, &source_path)
                    .await?;
                info!("Firmware image at {:?}", binary);
                Ok(BuildResult::succeeded(Some(path_to_string(binary))))
            }
            BuildJobType::BuildAndFlash => {
                self.enter(PipelineState::Flashing);
                let device = request
                    .serial_device
                    .as_deref()
                    .map(str::trim)
                    .filter(|device| !device.is_empty());
                if device.is_none() && request.target.flashing_method.requires_serial_device() {
                    return Err(PipelineError::MissingDevice(request.target.name.clone()));
                }

                let output = self
                    .toolchain
                    .flash(&request.target, &source_path, device, self.sink())
                    .await?;
                if !output.success {
                    return Err(PipelineError::Flash(output.diagnostics().to_string()));
                }
                Ok(BuildResult::succeeded(None))
            }
        }
    }

    async fn verify_build_system(&self) -> Result<(), PipelineError> {
        let runtime = self.toolchain.check_prerequisite().await?;
        if !runtime.success {
            return Err(PipelineError::Python(captured(&runtime)));
        }

        let core = self.toolchain.check_core_installed().await?;
        if !core.success {
            info!("Build core not found, installing");
            let install = self.toolchain.install(self.sink()).await?;
            if !install.success {
                return Err(PipelineError::Platformio(captured(&install)));
            }
        }
        Ok(())
    }

    fn sink(&self) -> OutputSink {
        let batcher = Arc::clone(&self.batcher);
        sink_from_fn(move |chunk| batcher.enqueue(chunk))
    }

    /// Moves to `state` and announces its step.
    fn enter(&self, state: PipelineState) {
        self.batcher.flush();
        self.set_state(state);
        if let Some(step) = state.step() {
            info!("Step {:?}", step);
            self.bus.publish_progress(ProgressEvent::info(step));
        }
    }

    fn set_state(&self, state: PipelineState) {
        *self.state.lock() = state;
    }

    fn report_failure(&self, kind: ErrorKind) {
        let mut state = self.state.lock();
        if let Some(step) = state.step() {
            self.bus.publish_progress(ProgressEvent::error(step));
        }
        *state = PipelineState::Failed(kind);
    }
}

#[async_trait]
impl BuildRunner for BuildOrchestrator {
    async fn submit_build(&self, request: &BuildRequest) -> BuildResult {
        BuildOrchestrator::submit_build(self, request).await
    }

    fn is_busy(&self) -> bool {
        BuildOrchestrator::is_busy(self)
    }
}

fn captured(output: &CommandOutput) -> String {
    [output.stderr.trim_end(), output.stdout.trim_end()]
        .iter()
        .filter(|text| !text.is_empty())
        .copied()
        .collect::<Vec<_>>()
        .join("\n")
}

fn path_to_string(path: PathBuf) -> String {
    path.to_string_lossy().into_owned()
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "build pipeline panicked".to_string()
    }
}
