use crate::config::MirrorConfig;
use crate::error::{Result, SyncError};
use crate::transport::MirrorTransport;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;

/// Mirror transport using `scp` to copy bundles and `ssh` to run the remote importer.
///
/// Both run in batch mode, so authentication must already work without a
/// prompt (agent or identity file).
#[derive(Debug)]
pub struct SshTransport {
    scp: PathBuf,
    ssh: PathBuf,
    host: String,
    user: Option<String>,
    port: u16,
    identity_file: Option<PathBuf>,
    remote_archive_dir: String,
    remote_import_command: String,
}

impl SshTransport {
    /// Create new transport from mirror config
    ///
    /// # Errors
    /// - Returns error if no mirror host is configured
    /// - Returns error if `scp` or `ssh` is not in PATH
    pub fn new(config: &MirrorConfig) -> Result<Self> {
        let host = config
            .host
            .clone()
            .ok_or_else(|| SyncError::Config("mirror.host is not set".to_string()))?;

        let scp = which::which("scp")
            .map_err(|_| SyncError::Transport("scp binary not found in PATH".to_string()))?;
        let ssh = which::which("ssh")
            .map_err(|_| SyncError::Transport("ssh binary not found in PATH".to_string()))?;

        Ok(Self {
            scp,
            ssh,
            host,
            user: config.user.clone(),
            port: config.port,
            identity_file: config.identity_file.clone(),
            remote_archive_dir: config.remote_archive_dir.trim_end_matches('/').to_string(),
            remote_import_command: config.remote_import_command.clone(),
        })
    }

    fn destination(&self) -> String {
        match &self.user {
            Some(user) => format!("{user}@{}", self.host),
            None => self.host.clone(),
        }
    }

    fn common_args(&self, port_flag: &str) -> Vec<String> {
        let mut args = vec![
            port_flag.to_string(),
            self.port.to_string(),
            "-o".to_string(),
            "BatchMode=yes".to_string(),
        ];
        if let Some(identity) = &self.identity_file {
            args.push("-i".to_string());
            args.push(identity.display().to_string());
        }
        args
    }

    fn scp_args(&self, bundle: &Path) -> Vec<String> {
        let mut args = self.common_args("-P");
        args.push(bundle.display().to_string());
        args.push(format!("{}:{}/", self.destination(), self.remote_archive_dir));
        args
    }

    fn ssh_args(&self) -> Vec<String> {
        let mut args = self.common_args("-p");
        args.push(self.destination());
        args.push(self.remote_import_command.clone());
        args
    }

    async fn run(program: &Path, args: &[String]) -> Result<()> {
        tracing::debug!(program = %program.display(), ?args, "Running");

        let output = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| {
                SyncError::Transport(format!("Failed to spawn {}: {e}", program.display()))
            })?;

        if output.status.success() {
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(SyncError::Transport(format!(
                "{} exited with {}: {}",
                program.display(),
                output.status,
                stderr.trim()
            )))
        }
    }
}

#[async_trait]
impl MirrorTransport for SshTransport {
    fn name(&self) -> &str {
        "ssh"
    }

    async fn send(&self, bundle: &Path, mirror_registry: &str) -> Result<String> {
        let file_name = bundle
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| SyncError::Transport(format!("Bad bundle path {}", bundle.display())))?;

        tracing::info!(
            bundle = %bundle.display(),
            host = %self.host,
            mirror = mirror_registry,
            "Copying bundle to mirror"
        );
        Self::run(&self.scp, &self.scp_args(bundle)).await?;

        Ok(format!("{}/{file_name}", self.remote_archive_dir))
    }

    async fn trigger_import(&self, mirror_registry: &str) -> Result<()> {
        tracing::info!(host = %self.host, mirror = mirror_registry, "Triggering remote import");
        Self::run(&self.ssh, &self.ssh_args()).await
    }
}
