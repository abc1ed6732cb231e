use crate::core::{DeviceTarget, FlashingMethod};
use crate::defines::parse_define_keys;
use crate::process::{run_captured, run_streaming, CommandOutput, OutputSink};
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::process::Command;

/// Name of the defines file a firmware tree ships with and the compiler reads.
pub const USER_DEFINES_FILE: &str = "user_defines.txt";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DefineCompatibility {
    pub compatible: bool,
    pub incompatible_keys: Vec<String>,
}

impl DefineCompatibility {
    pub fn compatible() -> Self {
        Self {
            compatible: true,
            incompatible_keys: Vec::new(),
        }
    }

    pub fn incompatible(keys: Vec<String>) -> Self {
        Self {
            compatible: keys.is_empty(),
            incompatible_keys: keys,
        }
    }
}

/// Everything the pipeline needs from the native firmware toolchain.
#[async_trait]
pub trait ToolchainBackend: Send + Sync {
    /// Is the toolchain's language runtime available?
    async fn check_prerequisite(&self) -> Result<CommandOutput>;

    /// Is the build core installed?
    async fn check_core_installed(&self) -> Result<CommandOutput>;

    async fn install(&self, sink: OutputSink) -> Result<CommandOutput>;

    async fn check_define_compatibility(
        &self,
        source: &Path,
        enabled_keys: &[String],
    ) -> Result<DefineCompatibility>;

    async fn compile(
        &self,
        target: &DeviceTarget,
        defines_text: &str,
        source: &Path,
        sink: OutputSink,
    ) -> Result<CommandOutput>;

    async fn get_binary_path(&self, target: &DeviceTarget, source: &Path) -> Result<PathBuf>;

    async fn flash(
        &self,
        target: &DeviceTarget,
        source: &Path,
        device: Option<&str>,
        sink: OutputSink,
    ) -> Result<CommandOutput>;
}

/// Drives PlatformIO through the configured Python interpreter.
pub struct PlatformioToolchain {
    python: String,
}

impl PlatformioToolchain {
    pub fn new(python: impl Into<String>) -> Self {
        Self {
            python: python.into(),
        }
    }

    fn pio(&self, source: &Path) -> Command {
        let mut command = Command::new(&self.python);
        command.arg("-m").arg("platformio").current_dir(source);
        command
    }

    async fn write_defines(&self, source: &Path, defines_text: &str) -> Result<PathBuf> {
        let build_dir = source.join(".pio");
        fs::create_dir_all(&build_dir).await?;
        let path = build_dir.join(USER_DEFINES_FILE);
        fs::write(&path, defines_text).await?;
        Ok(path)
    }
}

#[async_trait]
impl ToolchainBackend for PlatformioToolchain {
    async fn check_prerequisite(&self) -> Result<CommandOutput> {
        let mut command = Command::new(&self.python);
        command.arg("--version");
        Ok(run_or_report(command).await)
    }

    async fn check_core_installed(&self) -> Result<CommandOutput> {
        let mut command = Command::new(&self.python);
        command.arg("-m").arg("platformio").arg("--version");
        Ok(run_or_report(command).await)
    }

    async fn install(&self, sink: OutputSink) -> Result<CommandOutput> {
        let mut command = Command::new(&self.python);
        command
            .arg("-m")
            .arg("pip")
            .arg("install")
            .arg("--user")
            .arg("--upgrade")
            .arg("platformio");
        Ok(run_streaming(command, Some(sink)).await?)
    }

    async fn check_define_compatibility(
        &self,
        source: &Path,
        enabled_keys: &[String],
    ) -> Result<DefineCompatibility> {
        let defines_path = source.join(USER_DEFINES_FILE);
        let known = match fs::read_to_string(&defines_path).await {
            Ok(text) => parse_define_keys(&text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(
                    "No {} in {:?}, skipping define compatibility check",
                    USER_DEFINES_FILE,
                    source
                );
                return Ok(DefineCompatibility::compatible());
            }
            Err(e) => return Err(e.into()),
        };

        let incompatible = enabled_keys
            .iter()
            .filter(|key| !known.contains(key))
            .cloned()
            .collect();
        Ok(DefineCompatibility::incompatible(incompatible))
    }

    async fn compile(
        &self,
        target: &DeviceTarget,
        defines_text: &str,
        source: &Path,
        sink: OutputSink,
    ) -> Result<CommandOutput> {
        let defines_path = self.write_defines(source, defines_text).await?;
        let mut command = self.pio(source);
        command
            .arg("run")
            .arg("--environment")
            .arg(&target.name)
            .env("USER_DEFINES_TXT", &defines_path);
        Ok(run_streaming(command, Some(sink)).await?)
    }

    async fn get_binary_path(&self, target: &DeviceTarget, source: &Path) -> Result<PathBuf> {
        let env_dir = source.join(".pio").join("build").join(&target.name);
        for ext in ["bin", "hex", "elf"] {
            let candidate = env_dir.join(format!("firmware.{}", ext));
            if candidate.is_file() {
                return Ok(candidate);
            }
        }
        // Not built yet: report where the image is expected to appear.
        Ok(env_dir.join("firmware.bin"))
    }

    async fn flash(
        &self,
        target: &DeviceTarget,
        source: &Path,
        device: Option<&str>,
        sink: OutputSink,
    ) -> Result<CommandOutput> {
        let mut command = self.pio(source);
        command
            .arg("run")
            .arg("--environment")
            .arg(&target.name)
            .arg("--target")
            .arg("upload");

        if let Some(port) = device {
            command.arg("--upload-port").arg(port);
        } else if target.flashing_method == FlashingMethod::Wifi {
            tracing::info!("No upload address given, relying on mDNS defaults for {}", target.name);
        }

        Ok(run_streaming(command, Some(sink)).await?)
    }
}

/// Probe commands report a missing executable as a failed check, not an error.
async fn run_or_report(command: Command) -> CommandOutput {
    match run_captured(command).await {
        Ok(output) => output,
        Err(e) => CommandOutput::failed(e.to_string()),
    }
}
