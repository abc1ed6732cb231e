use crate::error::SourceError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Where the firmware tree for a build comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "camelCase")]
pub enum FirmwareSource {
    Local {
        path: String,
    },
    GitCommit {
        hash: String,
    },
    GitBranch {
        name: String,
    },
    GitTag {
        name: String,
    },
    #[serde(rename_all = "camelCase")]
    GitPullRequest {
        id: u64,
        title: String,
        head_commit_hash: String,
    },
}

impl FirmwareSource {
    /// Checks that the selected variant carries its required field, and that
    /// git refs cannot be mistaken for command-line options.
    pub fn validate(&self) -> Result<(), SourceError> {
        let (field, value) = match self {
            FirmwareSource::Local { path } => ("path", path.as_str()),
            FirmwareSource::GitCommit { hash } => ("hash", hash.as_str()),
            FirmwareSource::GitBranch { name } | FirmwareSource::GitTag { name } => {
                ("name", name.as_str())
            }
            FirmwareSource::GitPullRequest {
                head_commit_hash, ..
            } => ("headCommitHash", head_commit_hash.as_str()),
        };

        let value = value.trim();
        if value.is_empty() {
            return Err(SourceError::MissingField {
                source_kind: self.kind_name(),
                field,
            });
        }

        let valid = match self {
            FirmwareSource::Local { .. } => true,
            FirmwareSource::GitCommit { .. } | FirmwareSource::GitPullRequest { .. } => {
                value.chars().all(|c| c.is_ascii_hexdigit())
            }
            FirmwareSource::GitBranch { .. } | FirmwareSource::GitTag { .. } => {
                !value.starts_with('-') && !value.chars().any(|c| c.is_control())
            }
        };
        if !valid {
            return Err(SourceError::InvalidRef {
                source_kind: self.kind_name(),
                field,
                value: value.to_string(),
            });
        }
        Ok(())
    }

    pub fn is_git(&self) -> bool {
        !matches!(self, FirmwareSource::Local { .. })
    }

    /// Where the firmware tree lives, taken from the field of the selected variant.
    pub fn location(&self) -> SourceLocation {
        match self {
            FirmwareSource::Local { path } => SourceLocation::Local(PathBuf::from(path)),
            FirmwareSource::GitCommit { hash } => {
                SourceLocation::Git(GitRef::Commit(hash.trim().to_string()))
            }
            FirmwareSource::GitBranch { name } => {
                SourceLocation::Git(GitRef::Branch(name.trim().to_string()))
            }
            FirmwareSource::GitTag { name } => SourceLocation::Git(GitRef::Tag(name.trim().to_string())),
            FirmwareSource::GitPullRequest {
                head_commit_hash, ..
            } => SourceLocation::Git(GitRef::Commit(head_commit_hash.trim().to_string())),
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            FirmwareSource::Local { .. } => "Local",
            FirmwareSource::GitCommit { .. } => "GitCommit",
            FirmwareSource::GitBranch { .. } => "GitBranch",
            FirmwareSource::GitTag { .. } => "GitTag",
            FirmwareSource::GitPullRequest { .. } => "GitPullRequest",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceLocation {
    /// Used as-is, without any existence check.
    Local(PathBuf),
    Git(GitRef),
}

/// A checkout target inside a repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GitRef {
    Commit(String),
    Branch(String),
    Tag(String),
}

impl GitRef {
    /// Revision string handed to `git checkout` after a fetch.
    pub fn revision(&self) -> String {
        match self {
            GitRef::Commit(hash) => hash.clone(),
            GitRef::Branch(name) => format!("origin/{}", name),
            GitRef::Tag(name) => format!("tags/{}", name),
        }
    }
}

impl std::fmt::Display for GitRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GitRef::Commit(hash) => write!(f, "commit {}", hash),
            GitRef::Branch(name) => write!(f, "branch {}", name),
            GitRef::Tag(name) => write!(f, "tag {}", name),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepositoryDescriptor {
    pub url: String,
    pub owner: String,
    pub repository_name: String,
    pub raw_repo_url: String,
    pub source_folder: String,
}

impl RepositoryDescriptor {
    /// Relative cache location for this repository's clone.
    pub fn cache_key(&self) -> PathBuf {
        PathBuf::from(sanitize_path_component(&self.owner))
            .join(sanitize_path_component(&self.repository_name))
    }
}

fn sanitize_path_component(value: &str) -> String {
    let cleaned: String = value
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect();

    match cleaned.trim_matches('.') {
        "" => "_".to_string(),
        trimmed => trimmed.to_string(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FlashingMethod {
    #[serde(rename = "UART")]
    Uart,
    BetaflightPassthrough,
    #[serde(rename = "WIFI")]
    Wifi,
    #[serde(rename = "STLink")]
    Stlink,
    #[serde(rename = "DFU")]
    Dfu,
    EdgeTxPassthrough,
}

impl FlashingMethod {
    /// Methods that talk to the device over a local serial port.
    pub fn requires_serial_device(self) -> bool {
        matches!(
            self,
            FlashingMethod::Uart
                | FlashingMethod::BetaflightPassthrough
                | FlashingMethod::EdgeTxPassthrough
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceTarget {
    pub name: String,
    pub flashing_method: FlashingMethod,
}

impl DeviceTarget {
    pub fn new(name: impl Into<String>, flashing_method: FlashingMethod) -> Self {
        Self {
            name: name.into(),
            flashing_method,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    pub id: String,
    pub name: String,
    pub category: String,
    pub device_type: String,
    pub targets: Vec<DeviceTarget>,
    pub supported_define_keys: Vec<String>,
    #[serde(default)]
    pub wiki_url: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UserDefineType {
    Boolean,
    Number,
    Text,
    Enum,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserDefine {
    pub key: String,
    #[serde(default)]
    pub value: String,
    pub enabled: bool,
    #[serde(default)]
    pub enum_values: Option<Vec<String>>,
    #[serde(rename = "type")]
    pub define_type: UserDefineType,
}

impl UserDefine {
    pub fn boolean(key: impl Into<String>, enabled: bool) -> Self {
        Self {
            key: key.into(),
            value: String::new(),
            enabled,
            enum_values: None,
            define_type: UserDefineType::Boolean,
        }
    }

    pub fn with_value(
        key: impl Into<String>,
        value: impl Into<String>,
        define_type: UserDefineType,
    ) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            enabled: true,
            enum_values: None,
            define_type,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BuildJobType {
    Build,
    BuildAndFlash,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UserDefinesMode {
    Manual,
    UserInterface,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildRequest {
    pub job_type: BuildJobType,
    pub firmware_source: FirmwareSource,
    pub target: DeviceTarget,
    pub user_defines_mode: UserDefinesMode,
    #[serde(default)]
    pub user_defines_text: String,
    #[serde(default)]
    pub user_defines: Vec<UserDefine>,
    #[serde(default)]
    pub serial_device: Option<String>,
    pub repository: RepositoryDescriptor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    GenericError,
    PythonDependencyError,
    PlatformioDependencyError,
    GitDependencyError,
    BuildError,
    FlashError,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_type: Option<ErrorKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub firmware_binary_path: Option<String>,
    pub duration_ms: u64,
}

impl BuildResult {
    pub fn succeeded(firmware_binary_path: Option<String>) -> Self {
        Self {
            success: true,
            message: None,
            error_type: None,
            firmware_binary_path,
            duration_ms: 0,
        }
    }

    pub fn failed(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: Some(message.into()),
            error_type: Some(kind),
            firmware_binary_path: None,
            duration_ms: 0,
        }
    }

    pub fn with_duration(mut self, duration_ms: u64) -> Self {
        self.duration_ms = duration_ms;
        self
    }
}

/// Pipeline steps, in the order they are reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum BuildStep {
    VerifyingBuildSystem,
    DownloadingFirmware,
    BuildingUserDefines,
    BuildingFirmware,
    FlashingFirmware,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProgressKind {
    Info,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressEvent {
    #[serde(rename = "type")]
    pub kind: ProgressKind,
    pub step: BuildStep,
}

impl ProgressEvent {
    pub fn info(step: BuildStep) -> Self {
        Self {
            kind: ProgressKind::Info,
            step,
        }
    }

    pub fn error(step: BuildStep) -> Self {
        Self {
            kind: ProgressKind::Error,
            step,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEvent {
    pub data: String,
}
