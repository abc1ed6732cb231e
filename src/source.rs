use crate::core::{GitRef, RepositoryDescriptor};
use crate::error::SourceError;
use crate::process::{run_streaming, OutputSink};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::process::Command;

const PULL_REQUEST_REFSPEC: &str = "+refs/pull/*/head:refs/remotes/origin/pull/*";

/// Produces a checked-out firmware tree for a repository and ref.
#[async_trait]
pub trait SourceResolver: Send + Sync {
    /// Finds the git executable to use for checkouts.
    fn locate_git(&self) -> Result<PathBuf, SourceError>;

    /// Clones or fetches `repository`, checks out `git_ref` and returns the
    /// path of the firmware sources inside the working tree.
    async fn checkout(
        &self,
        git: &Path,
        repository: &RepositoryDescriptor,
        git_ref: &GitRef,
        sink: OutputSink,
    ) -> Result<PathBuf, SourceError>;
}

/// Keeps one clone per repository under `cache_dir` and reuses it across builds.
pub struct GitSourceResolver {
    cache_dir: PathBuf,
    git_override: Option<PathBuf>,
}

impl GitSourceResolver {
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            git_override: None,
        }
    }

    pub fn with_git_binary(mut self, git: impl Into<PathBuf>) -> Self {
        self.git_override = Some(git.into());
        self
    }

    pub fn clone_dir(&self, repository: &RepositoryDescriptor) -> PathBuf {
        self.cache_dir.join(repository.cache_key())
    }

    async fn ensure_clone(
        &self,
        git: &Path,
        repository: &RepositoryDescriptor,
        sink: &OutputSink,
    ) -> Result<PathBuf, SourceError> {
        let clone_dir = self.clone_dir(repository);

        if clone_dir.join(".git").is_dir() {
            tracing::info!("Fetching {} into {:?}", repository.url, clone_dir);
            run_git(
                git,
                &clone_dir,
                &["remote", "set-url", "origin", repository.url.as_str()],
                sink,
            )
            .await?;
        } else {
            if clone_dir.exists() {
                tracing::warn!("Removing incomplete clone at {:?}", clone_dir);
                fs::remove_dir_all(&clone_dir).await?;
            }
            let parent = clone_dir.parent().unwrap_or(self.cache_dir.as_path());
            fs::create_dir_all(parent).await?;

            tracing::info!("Cloning {} into {:?}", repository.url, clone_dir);
            let target = clone_dir.to_string_lossy().to_string();
            run_git(
                git,
                parent,
                &["clone", "--no-checkout", repository.url.as_str(), target.as_str()],
                sink,
            )
            .await?;
        }

        run_git(
            git,
            &clone_dir,
            &["fetch", "--tags", "--force", "origin", "+refs/heads/*:refs/remotes/origin/*"],
            sink,
        )
        .await?;

        // Not every remote exposes pull request refs.
        if let Err(e) = run_git(
            git,
            &clone_dir,
            &["fetch", "--force", "origin", PULL_REQUEST_REFSPEC],
            sink,
        )
        .await
        {
            tracing::debug!("Pull request refs unavailable for {}: {}", repository.url, e);
        }

        Ok(clone_dir)
    }
}

#[async_trait]
impl SourceResolver for GitSourceResolver {
    fn locate_git(&self) -> Result<PathBuf, SourceError> {
        match &self.git_override {
            Some(path) => which::which(path).map_err(|e| {
                SourceError::GitNotFound(format!("{}: {}", path.display(), e))
            }),
            None => which::which("git").map_err(|e| SourceError::GitNotFound(e.to_string())),
        }
    }

    async fn checkout(
        &self,
        git: &Path,
        repository: &RepositoryDescriptor,
        git_ref: &GitRef,
        sink: OutputSink,
    ) -> Result<PathBuf, SourceError> {
        let clone_dir = self.ensure_clone(git, repository, &sink).await?;
        let revision = git_ref.revision();

        tracing::info!("Checking out {} in {:?}", git_ref, clone_dir);
        run_git(
            git,
            &clone_dir,
            &["checkout", "--force", "--detach", revision.as_str()],
            &sink,
        )
        .await?;
        run_git(git, &clone_dir, &["reset", "--hard", revision.as_str()], &sink).await?;
        run_git(git, &clone_dir, &["clean", "-ffdx"], &sink).await?;

        let folder = repository.source_folder.trim_matches('/');
        if folder.is_empty() {
            Ok(clone_dir)
        } else {
            Ok(clone_dir.join(folder))
        }
    }
}

async fn run_git(
    git: &Path,
    cwd: &Path,
    args: &[&str],
    sink: &OutputSink,
) -> Result<(), SourceError> {
    let mut command = Command::new(git);
    command
        .args(args)
        .current_dir(cwd)
        .env("GIT_TERMINAL_PROMPT", "0");

    let output = run_streaming(command, Some(sink.clone()))
        .await
        .map_err(|e| SourceError::Git {
            command: args.join(" "),
            stderr: e.to_string(),
        })?;

    if !output.success {
        return Err(SourceError::Git {
            command: args.join(" "),
            stderr: output.diagnostics().trim().to_string(),
        });
    }
    Ok(())
}
