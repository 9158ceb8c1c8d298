//! Remote command execution against access points.
//!
//! `SshExecutor` runs the system `ssh` client as a child process via
//! `tokio::process::Command`. Each call is one SSH session; the child is
//! killed if the call is dropped, so a timed-out or aborted query never
//! leaves a session behind.

use std::future::Future;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;

/// Exit status ssh reserves for its own connection and auth failures.
const SSH_CONNECTION_FAILURE: i32 = 255;

/// Raw output of a remote command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    /// Remote command's exit status; `None` if it was killed by a signal.
    pub exit_code: Option<i32>,
}

/// Failure to talk to an access point at all.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteFailure {
    #[error("could not launch {program}: {reason}")]
    Spawn { program: String, reason: String },

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

impl RemoteFailure {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }
}

/// How unknown host keys are treated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum HostKeyPolicy {
    /// Trust only hosts in the user's known_hosts file.
    KnownHosts,
    /// Connect to unknown hosts, logging ssh's warning.
    #[default]
    AcceptUnknown,
}

impl HostKeyPolicy {
    pub fn from_known_hosts_flag(use_known_hosts: bool) -> Self {
        if use_known_hosts {
            Self::KnownHosts
        } else {
            Self::AcceptUnknown
        }
    }
}

/// Runs one command on one host as one user.
#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    async fn execute(
        &self,
        user: &str,
        host: &str,
        command: &str,
    ) -> Result<RemoteOutput, RemoteFailure>;
}

/// Bound `call` by `timeout`, if one is set.
pub async fn with_deadline<F>(
    timeout: Option<Duration>,
    call: F,
) -> Result<RemoteOutput, RemoteFailure>
where
    F: Future<Output = Result<RemoteOutput, RemoteFailure>>,
{
    match timeout {
        Some(limit) => tokio::time::timeout(limit, call)
            .await
            .map_err(|_| RemoteFailure::Timeout(limit))?,
        None => call.await,
    }
}

/// Wrapper around the `ssh` binary.
pub struct SshExecutor {
    ssh_path: String,
    host_keys: HostKeyPolicy,
    timeout: Option<Duration>,
}

impl SshExecutor {
    pub fn new(ssh_path: &str, host_keys: HostKeyPolicy, timeout: Option<Duration>) -> Self {
        Self {
            ssh_path: ssh_path.to_string(),
            host_keys,
            timeout,
        }
    }

    fn build_command(&self, user: &str, host: &str, command: &str) -> Command {
        let mut cmd = Command::new(&self.ssh_path);
        cmd.arg("-o").arg("BatchMode=yes");

        match self.host_keys {
            HostKeyPolicy::KnownHosts => {
                cmd.arg("-o").arg("StrictHostKeyChecking=yes");
            }
            HostKeyPolicy::AcceptUnknown => {
                cmd.arg("-o").arg("StrictHostKeyChecking=no");
            }
        }

        if let Some(timeout) = self.timeout {
            // ssh only takes whole seconds; round up so a sub-second
            // timeout is not turned into "no timeout".
            let secs = timeout.as_secs() + u64::from(timeout.subsec_nanos() > 0);
            cmd.arg("-o").arg(format!("ConnectTimeout={}", secs.max(1)));
        }

        cmd.arg("-l")
            .arg(user)
            .arg(host)
            .arg(command)
            .stdin(Stdio::null())
            .kill_on_drop(true);
        cmd
    }

    /// Re-log ssh's `Warning:` lines; returns how many were logged.
    fn log_host_key_warnings(&self, host: &str, stderr: &[u8]) -> usize {
        if self.host_keys != HostKeyPolicy::AcceptUnknown {
            return 0;
        }
        let mut logged = 0;
        for line in String::from_utf8_lossy(stderr).lines() {
            if line.starts_with("Warning:") {
                tracing::warn!(host = %host, message = %line.trim(), "Accepted unverified host key");
                logged += 1;
            }
        }
        logged
    }
}

#[async_trait]
impl RemoteExecutor for SshExecutor {
    async fn execute(
        &self,
        user: &str,
        host: &str,
        command: &str,
    ) -> Result<RemoteOutput, RemoteFailure> {
        let mut cmd = self.build_command(user, host, command);
        tracing::debug!(host = %host, user = %user, command = %command, "Running remote command");

        let run = async {
            match cmd.output().await {
                Ok(out) => Ok(RemoteOutput {
                    stdout: out.stdout,
                    stderr: out.stderr,
                    exit_code: out.status.code(),
                }),
                Err(e) => Err(RemoteFailure::Spawn {
                    program: self.ssh_path.clone(),
                    reason: e.to_string(),
                }),
            }
        };
        let output = with_deadline(self.timeout, run).await?;

        self.log_host_key_warnings(host, &output.stderr);

        if output.exit_code == Some(SSH_CONNECTION_FAILURE) {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(RemoteFailure::Connect(stderr));
        }

        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(cmd: &Command) -> Vec<String> {
        cmd.as_std()
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn test_known_hosts_args() {
        let ssh = SshExecutor::new("ssh", HostKeyPolicy::KnownHosts, None);
        let cmd = ssh.build_command("admin", "10.0.0.2", "mca-dump");
        assert_eq!(
            args(&cmd),
            vec![
                "-o",
                "BatchMode=yes",
                "-o",
                "StrictHostKeyChecking=yes",
                "-l",
                "admin",
                "10.0.0.2",
                "mca-dump"
            ]
        );
    }

    #[test]
    fn test_accept_unknown_with_timeout() {
        let ssh = SshExecutor::new(
            "ssh",
            HostKeyPolicy::AcceptUnknown,
            Some(Duration::from_millis(2500)),
        );
        let a = args(&ssh.build_command("admin", "ap1", "mca-dump"));
        assert!(a.contains(&"StrictHostKeyChecking=no".to_string()));
        assert!(a.contains(&"ConnectTimeout=3".to_string()));
    }

    #[test]
    fn test_host_key_policy_default() {
        assert_eq!(HostKeyPolicy::default(), HostKeyPolicy::AcceptUnknown);
        assert_eq!(
            HostKeyPolicy::from_known_hosts_flag(true),
            HostKeyPolicy::KnownHosts
        );
    }

    #[tokio::test]
    async fn test_missing_binary_is_spawn_failure() {
        let ssh = SshExecutor::new(
            "/nonexistent/ssh-binary",
            HostKeyPolicy::AcceptUnknown,
            None,
        );
        let err = ssh.execute("admin", "ap1", "mca-dump").await.unwrap_err();
        assert!(matches!(err, RemoteFailure::Spawn { .. }));
        assert!(!err.is_timeout());
    }

    #[tokio::test]
    async fn test_deadline_expires() {
        let err = with_deadline(Some(Duration::from_millis(20)), std::future::pending())
            .await
            .unwrap_err();
        assert_eq!(err, RemoteFailure::Timeout(Duration::from_millis(20)));
        assert!(err.is_timeout());
    }

    #[tokio::test]
    async fn test_no_deadline_passes_through() {
        let out = with_deadline(None, async { Ok(RemoteOutput::default()) })
            .await
            .unwrap();
        assert!(out.stdout.is_empty());
    }

    #[test]
    fn test_host_key_warnings_relogged_only_when_accepting_unknown() {
        let stderr = b"Warning: Permanently added 'ap1' (ED25519) to the list of known hosts.\nmca-dump: ok\n";
        let accepting = SshExecutor::new("ssh", HostKeyPolicy::AcceptUnknown, None);
        assert_eq!(accepting.log_host_key_warnings("ap1", stderr), 1);

        let strict = SshExecutor::new("ssh", HostKeyPolicy::KnownHosts, None);
        assert_eq!(strict.log_host_key_warnings("ap1", stderr), 0);
    }

    /// Write an executable stand-in for `ssh` and return its directory and path.
    #[cfg(unix)]
    fn fake_ssh(script: &str) -> (tempfile::TempDir, String) {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ssh");
        std::fs::write(&path, format!("#!/bin/sh\n{script}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        let path = path.to_str().unwrap().to_string();
        (dir, path)
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_exit_255_is_connect_failure() {
        let (_dir, path) = fake_ssh(
            "echo 'Warning: Permanently added ap1' >&2\necho '  refused ' >&2\nexit 255",
        );
        let ssh = SshExecutor::new(&path, HostKeyPolicy::AcceptUnknown, None);

        let err = ssh.execute("admin", "ap1", "mca-dump").await.unwrap_err();
        assert_eq!(
            err,
            RemoteFailure::Connect("Warning: Permanently added ap1\n  refused".to_string())
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_slow_session_times_out() {
        let (_dir, path) = fake_ssh("exec sleep 5");
        let limit = Duration::from_millis(200);
        let ssh = SshExecutor::new(&path, HostKeyPolicy::KnownHosts, Some(limit));

        let start = std::time::Instant::now();
        let err = ssh.execute("admin", "ap1", "mca-dump").await.unwrap_err();
        assert_eq!(err, RemoteFailure::Timeout(limit));
        assert!(start.elapsed() < Duration::from_secs(3));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_remote_command_exit_code_is_not_a_failure() {
        let (_dir, path) = fake_ssh(
            "echo 'Warning: Permanently added ap1' >&2\nprintf '{\"vap_table\": []}'\nexit 3",
        );
        let ssh = SshExecutor::new(&path, HostKeyPolicy::AcceptUnknown, None);

        let out = ssh.execute("admin", "ap1", "mca-dump").await.unwrap();
        assert_eq!(out.exit_code, Some(3));
        assert_eq!(out.stdout, br#"{"vap_table": []}"#.to_vec());
        assert!(String::from_utf8_lossy(&out.stderr).starts_with("Warning:"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_arguments_reach_ssh() {
        let (_dir, path) = fake_ssh("printf '%s\\n' \"$@\"");
        let ssh = SshExecutor::new(&path, HostKeyPolicy::KnownHosts, None);

        let out = ssh.execute("admin", "10.0.0.2", "mca-dump").await.unwrap();
        let args: Vec<String> = String::from_utf8(out.stdout)
            .unwrap()
            .lines()
            .map(str::to_string)
            .collect();
        assert_eq!(
            args,
            vec![
                "-o",
                "BatchMode=yes",
                "-o",
                "StrictHostKeyChecking=yes",
                "-l",
                "admin",
                "10.0.0.2",
                "mca-dump"
            ]
        );
    }
}
