//! [`RemoteSession`] over the system OpenSSH client.
//!
//! `open` authenticates once and leaves a ControlMaster running on a socket
//! in a private temporary directory. Commands and `scp` transfers reuse that
//! master, so each call costs no extra handshake. Credentials reach ssh
//! through a generated askpass helper and its environment, never argv.

use crate::process::{run_captured, run_with_input, spawn_error};
use async_trait::async_trait;
use dbsync_core::command::{RemoteCommand, shell_quote};
use dbsync_core::profile::{Secret, SshAuth, SshEndpoint};
use dbsync_core::session::{CommandOutput, ExecOptions, RemoteSession, SessionConnector};
use dbsync_core::{Result, SyncError};
use dbsync_core::error::TransferError;
use dbsync_execution::supervise;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const ASKPASS_PASSPHRASE_ENV: &str = "DBSYNC_ASKPASS_PASSPHRASE";
const ASKPASS_PASSWORD_ENV: &str = "DBSYNC_ASKPASS_PASSWORD";

const ASKPASS_SCRIPT: &str = r#"#!/bin/sh
case "$1" in
  *assphrase*) printf '%s\n' "$DBSYNC_ASKPASS_PASSPHRASE" ;;
  *) printf '%s\n' "$DBSYNC_ASKPASS_PASSWORD" ;;
esac
"#;

const AUTH_FAILURE_PATTERNS: [&str; 5] = [
    "Permission denied",
    "Too many authentication failures",
    "Authentication failed",
    "incorrect passphrase",
    "bad passphrase",
];

const LINK_FAILURE_PATTERNS: [&str; 7] = [
    "lost connection",
    "Connection closed",
    "Connection reset",
    "Broken pipe",
    "Control socket",
    "mux_client",
    "Connection timed out",
];

/// Maps an OpenSSH failure onto network or auth by its diagnostics.
pub(crate) fn classify_ssh_failure(host: &str, exit_code: i32, diagnostics: &str) -> SyncError {
    let message = diagnostics
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .last()
        .map(str::to_string)
        .unwrap_or_else(|| format!("ssh exited with code {exit_code}"));
    if AUTH_FAILURE_PATTERNS.iter().any(|p| diagnostics.contains(p)) {
        SyncError::auth(host, message)
    } else {
        SyncError::network(host, message)
    }
}

fn is_link_failure(stderr: &str) -> bool {
    LINK_FAILURE_PATTERNS.iter().any(|p| stderr.contains(p))
}

fn is_ssh_diagnostic(stderr: &str) -> bool {
    is_link_failure(stderr)
        || AUTH_FAILURE_PATTERNS.iter().any(|p| stderr.contains(p))
        || stderr.trim_start().starts_with("ssh:")
}

/// Remote shell that reads the script from stdin. With a marker it runs in
/// its own session so the whole process group can be stopped later.
fn remote_shell(marker: Option<&str>) -> String {
    match marker {
        Some(marker) => format!("setsid -w sh -s {marker}"),
        None => "sh -s".to_string(),
    }
}

/// Script fed to the remote shell, secret exports included. The group is
/// parsed whole before it runs, and commands inside it never read the
/// rest of the input.
fn script_input(command: &RemoteCommand) -> Vec<u8> {
    format!("{{\n{}\n}} </dev/null\n", command.render()).into_bytes()
}

fn kill_script(marker: &str) -> String {
    format!(
        "pid=$(pgrep -o -f {pattern}) && kill -TERM -- -$pid",
        pattern = shell_quote(&format!("^sh -s {marker}"))
    )
}

#[derive(Debug, Clone)]
pub struct OpenSshConfig {
    pub ssh_program: String,
    pub scp_program: String,
    /// Parent of the per-session control directory; system temp when unset.
    pub control_root: Option<PathBuf>,
    pub strict_host_key_checking: String,
    pub server_alive_interval: Duration,
}

impl Default for OpenSshConfig {
    fn default() -> Self {
        Self {
            ssh_program: "ssh".to_string(),
            scp_program: "scp".to_string(),
            control_root: None,
            strict_host_key_checking: "accept-new".to_string(),
            server_alive_interval: Duration::from_secs(15),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct OpenSshConnector {
    config: OpenSshConfig,
}

/// Credentials handed to ssh through the askpass helper.
struct AskpassSecrets {
    passphrase: Option<Secret>,
    password: Option<Secret>,
}

impl OpenSshConnector {
    pub fn new(config: OpenSshConfig) -> Self {
        Self { config }
    }

    fn auth_options(endpoint: &SshEndpoint) -> Result<(Vec<String>, AskpassSecrets)> {
        match &endpoint.auth {
            SshAuth::Key {
                path,
                passphrase,
                password_fallback,
            } => {
                check_key_permissions(path)?;
                let methods = if password_fallback.is_some() {
                    "publickey,keyboard-interactive,password"
                } else {
                    "publickey"
                };
                Ok((
                    vec![
                        "-i".to_string(),
                        path.to_string_lossy().into_owned(),
                        "-o".to_string(),
                        "IdentitiesOnly=yes".to_string(),
                        "-o".to_string(),
                        format!("PreferredAuthentications={methods}"),
                    ],
                    AskpassSecrets {
                        passphrase: passphrase.clone(),
                        password: password_fallback.clone(),
                    },
                ))
            }
            SshAuth::Password { password } => Ok((
                vec![
                    "-o".to_string(),
                    "PubkeyAuthentication=no".to_string(),
                    "-o".to_string(),
                    "PreferredAuthentications=keyboard-interactive,password".to_string(),
                ],
                AskpassSecrets {
                    passphrase: None,
                    password: Some(password.clone()),
                },
            )),
        }
    }

    fn master_command(
        &self,
        endpoint: &SshEndpoint,
        control: &Path,
        log: &Path,
    ) -> Result<Command> {
        let (auth_args, secrets) = Self::auth_options(endpoint)?;
        let mut cmd = Command::new(&self.config.ssh_program);
        cmd.args(["-M", "-N", "-f", "-T"])
            .arg("-S")
            .arg(control.join("control.sock"))
            .arg("-E")
            .arg(log)
            .arg("-p")
            .arg(endpoint.port.to_string())
            .args([
                "-o".to_string(),
                format!("ConnectTimeout={}", endpoint.connect_timeout.as_secs().max(1)),
                "-o".to_string(),
                format!(
                    "StrictHostKeyChecking={}",
                    self.config.strict_host_key_checking
                ),
                "-o".to_string(),
                format!(
                    "ServerAliveInterval={}",
                    self.config.server_alive_interval.as_secs()
                ),
                "-o".to_string(),
                "ServerAliveCountMax=3".to_string(),
                "-o".to_string(),
                "NumberOfPasswordPrompts=1".to_string(),
            ])
            .args(auth_args);

        if secrets.passphrase.is_some() || secrets.password.is_some() {
            let askpass = control.join("askpass.sh");
            write_askpass(&askpass)?;
            cmd.env("SSH_ASKPASS", &askpass)
                .env("SSH_ASKPASS_REQUIRE", "force")
                .env("DISPLAY", "dbsync:0");
            if let Some(passphrase) = &secrets.passphrase {
                cmd.env(ASKPASS_PASSPHRASE_ENV, passphrase.expose());
            }
            if let Some(password) = &secrets.password {
                cmd.env(ASKPASS_PASSWORD_ENV, password.expose());
            }
        } else {
            cmd.args(["-o", "BatchMode=yes"]);
        }

        cmd.arg(endpoint.destination())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        Ok(cmd)
    }
}

#[async_trait]
impl SessionConnector for OpenSshConnector {
    async fn open(&self, endpoint: &SshEndpoint) -> Result<Arc<dyn RemoteSession>> {
        endpoint.validate()?;
        let mut builder = tempfile::Builder::new();
        builder.prefix("dbsync-ssh-");
        let control = match &self.config.control_root {
            Some(root) => builder.tempdir_in(root)?,
            None => builder.tempdir()?,
        };
        let log = control.path().join("ssh.log");

        info!(
            "[Session] Connecting to {}:{}",
            endpoint.destination(),
            endpoint.port
        );
        let mut cmd = self.master_command(endpoint, control.path(), &log)?;
        let mut child = cmd
            .spawn()
            .map_err(|e| spawn_error(&self.config.ssh_program, e))?;

        // ssh forks into the background once authenticated, so the parent
        // exiting is the readiness signal.
        let options = ExecOptions::new(CancellationToken::new())
            .with_timeout(Some(endpoint.connect_timeout + Duration::from_secs(5)));
        let status = supervise("ssh connect", &options, async {
            Ok(child.wait().await?)
        })
        .await
        .map_err(|err| match err {
            SyncError::Timeout { .. } => SyncError::network(
                &endpoint.host,
                format!(
                    "no response within {}s",
                    endpoint.connect_timeout.as_secs()
                ),
            ),
            other => other,
        })?;

        if !status.success() {
            let diagnostics = std::fs::read_to_string(&log).unwrap_or_default();
            return Err(classify_ssh_failure(
                &endpoint.host,
                status.code().unwrap_or(-1),
                &diagnostics,
            ));
        }

        info!("[Session] Connected to {}", endpoint.host);
        Ok(Arc::new(OpenSshSession {
            host: endpoint.host.clone(),
            destination: endpoint.destination(),
            port: endpoint.port,
            ssh_program: self.config.ssh_program.clone(),
            scp_program: self.config.scp_program.clone(),
            socket: control.path().join("control.sock"),
            control: Mutex::new(Some(control)),
        }))
    }
}

#[cfg(unix)]
fn check_key_permissions(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let metadata = std::fs::metadata(path).map_err(|e| {
        SyncError::validation(
            "ssh.key_path",
            format!("SSH key file {} is not readable: {e}", path.display()),
        )
    })?;
    let mode = metadata.permissions().mode() & 0o777;
    if mode & 0o077 != 0 {
        return Err(SyncError::validation(
            "ssh.key_path",
            format!(
                "SSH key file {} has permissions {mode:o}, expected 600",
                path.display()
            ),
        ));
    }
    Ok(())
}

#[cfg(not(unix))]
fn check_key_permissions(path: &Path) -> Result<()> {
    if !path.is_file() {
        return Err(SyncError::validation(
            "ssh.key_path",
            format!("SSH key file {} not found", path.display()),
        ));
    }
    Ok(())
}

fn write_askpass(path: &Path) -> Result<()> {
    std::fs::write(path, ASKPASS_SCRIPT)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700))?;
    }
    Ok(())
}

/// A live ControlMaster connection.
pub struct OpenSshSession {
    host: String,
    destination: String,
    port: u16,
    ssh_program: String,
    scp_program: String,
    socket: PathBuf,
    /// Holds the control directory; `None` once closed.
    control: Mutex<Option<TempDir>>,
}

impl OpenSshSession {
    fn is_open(&self) -> bool {
        self.control
            .lock()
            .map(|guard| guard.is_some())
            .unwrap_or(false)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_open() {
            Ok(())
        } else {
            Err(SyncError::network(&self.host, "session already closed"))
        }
    }

    fn ssh(&self) -> Command {
        let mut cmd = Command::new(&self.ssh_program);
        cmd.arg("-S")
            .arg(&self.socket)
            .args(["-o", "ControlMaster=no", "-o", "BatchMode=yes", "-T", "-p"])
            .arg(self.port.to_string());
        cmd
    }

    fn scp(&self) -> Command {
        let mut cmd = Command::new(&self.scp_program);
        cmd.arg("-q")
            .arg("-o")
            .arg(format!("ControlPath={}", self.socket.display()))
            .args(["-o", "ControlMaster=no", "-o", "BatchMode=yes", "-P"])
            .arg(self.port.to_string());
        cmd
    }

    /// Best effort: stop a process group started under `marker`.
    async fn terminate_remote(&self, marker: &str) {
        let mut cmd = self.ssh();
        cmd.arg(&self.destination).arg("--").arg(kill_script(marker));
        let options = ExecOptions::new(CancellationToken::new())
            .with_timeout(Some(Duration::from_secs(10)));
        match run_captured(cmd, "remote terminate", &options).await {
            Ok(out) if out.success() => info!("[Session] Terminated remote command {}", marker),
            Ok(out) => warn!(
                "[Session] Could not terminate remote command {}: {}",
                marker,
                out.stderr.trim()
            ),
            Err(e) => warn!("[Session] Could not terminate remote command {}: {}", marker, e),
        }
    }

    async fn copy(&self, source: String, target: String, path: &str, options: &ExecOptions) -> Result<()> {
        self.ensure_open()?;
        let mut cmd = self.scp();
        cmd.arg("--").arg(&source).arg(&target);
        debug!("[Session] scp {} -> {}", source, target);
        let out = run_captured(cmd, "scp", options).await?;
        if out.success() {
            return Ok(());
        }
        if out.exit_code == 255 || is_link_failure(&out.stderr) {
            return Err(TransferError::Network {
                path: path.to_string(),
                message: out.stderr.trim().to_string(),
            }
            .into());
        }
        Err(SyncError::execution(
            format!("scp {source} {target}"),
            Some(out.exit_code),
            &out.stderr,
        ))
    }

    fn shutdown_master(&self) {
        // Synchronous so it also works from Drop.
        let _ = std::process::Command::new(&self.ssh_program)
            .arg("-S")
            .arg(&self.socket)
            .args(["-O", "exit"])
            .arg(&self.destination)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();
    }
}

#[async_trait]
impl RemoteSession for OpenSshSession {
    fn host(&self) -> &str {
        &self.host
    }

    async fn execute(&self, command: &RemoteCommand, options: &ExecOptions) -> Result<CommandOutput> {
        self.ensure_open()?;
        let marker = format!("dbsync-op-{}", uuid::Uuid::new_v4());
        let remote = remote_shell(options.terminate_remote.then_some(marker.as_str()));
        debug!("[Session] exec on {}: {}", self.host, command);

        let mut cmd = self.ssh();
        cmd.arg(&self.destination).arg("--").arg(remote);
        let result = run_with_input(cmd, script_input(command), "remote command", options).await;

        let err = match result {
            Ok(out) if out.exit_code == 255 && is_ssh_diagnostic(&out.stderr) => {
                classify_ssh_failure(&self.host, out.exit_code, &out.stderr)
            }
            Ok(out) => return Ok(out),
            Err(err) => err,
        };
        // The remote side outlives a dropped link.
        if options.terminate_remote
            && (err.is_transport_failure()
                || matches!(err, SyncError::Cancelled { .. } | SyncError::Timeout { .. }))
        {
            self.terminate_remote(&marker).await;
        }
        Err(err)
    }

    async fn download(&self, remote: &str, local: &Path, options: &ExecOptions) -> Result<()> {
        self.copy(
            format!("{}:{}", self.destination, remote),
            local.to_string_lossy().into_owned(),
            remote,
            options,
        )
        .await
    }

    async fn upload(&self, local: &Path, remote: &str, options: &ExecOptions) -> Result<()> {
        self.copy(
            local.to_string_lossy().into_owned(),
            format!("{}:{}", self.destination, remote),
            remote,
            options,
        )
        .await
    }

    async fn close(&self) -> Result<()> {
        let control = match self.control.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(dir) = control {
            self.shutdown_master();
            drop(dir);
            info!("[Session] Closed connection to {}", self.host);
        }
        Ok(())
    }
}

impl Drop for OpenSshSession {
    fn drop(&mut self) {
        let still_open = match self.control.get_mut() {
            Ok(guard) => guard.is_some(),
            Err(_) => false,
        };
        if still_open {
            self.shutdown_master();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_auth_failures() {
        let err = classify_ssh_failure(
            "db1",
            255,
            "debug1: something\ndeploy@db1: Permission denied (publickey).\n",
        );
        assert_eq!(
            err,
            SyncError::auth("db1", "deploy@db1: Permission denied (publickey).")
        );
        let err = classify_ssh_failure("db1", 255, "Received disconnect: Too many authentication failures");
        assert!(matches!(
            err,
            SyncError::Connection {
                kind: dbsync_core::error::ConnectionFailure::Auth,
                ..
            }
        ));
    }

    #[test]
    fn test_classify_network_failures() {
        let err = classify_ssh_failure(
            "db1",
            255,
            "ssh: connect to host db1 port 22: Connection refused\n",
        );
        assert_eq!(
            err,
            SyncError::network("db1", "ssh: connect to host db1 port 22: Connection refused")
        );
        let err = classify_ssh_failure("db1", 255, "");
        assert_eq!(err, SyncError::network("db1", "ssh exited with code 255"));
    }

    #[cfg(unix)]
    #[test]
    fn test_key_permissions() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let key = dir.path().join("id_ed25519");
        std::fs::write(&key, "key").unwrap();

        std::fs::set_permissions(&key, std::fs::Permissions::from_mode(0o644)).unwrap();
        assert!(check_key_permissions(&key).is_err());

        std::fs::set_permissions(&key, std::fs::Permissions::from_mode(0o600)).unwrap();
        assert!(check_key_permissions(&key).is_ok());

        assert!(check_key_permissions(&dir.path().join("missing")).is_err());
    }

    #[test]
    fn test_password_auth_uses_askpass() {
        let endpoint = SshEndpoint {
            host: "db1".to_string(),
            port: 2222,
            user: "deploy".to_string(),
            auth: SshAuth::Password {
                password: Secret::new("hunter2"),
            },
            connect_timeout: Duration::from_secs(10),
        };
        let (args, secrets) = OpenSshConnector::auth_options(&endpoint).unwrap();
        assert!(args.contains(&"PubkeyAuthentication=no".to_string()));
        assert!(secrets.password.is_some());
        assert!(secrets.passphrase.is_none());
        assert!(!args.iter().any(|a| a.contains("hunter2")));
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let session = OpenSshSession {
            host: "db1".to_string(),
            destination: "deploy@db1".to_string(),
            port: 22,
            ssh_program: "true".to_string(),
            scp_program: "true".to_string(),
            socket: dir.path().join("control.sock"),
            control: Mutex::new(Some(dir)),
        };
        session.close().await.unwrap();
        session.close().await.unwrap();
        let err = session
            .execute(&RemoteCommand::new("true"), &ExecOptions::default())
            .await
            .unwrap_err();
        assert!(err.is_transport_failure());
    }

    /// Fake `ssh` that logs its arguments, one invocation per line, then
    /// runs `body`.
    fn stub_ssh(dir: &Path, body: &str) -> String {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join("ssh");
        let log = dir.join("calls.log");
        std::fs::write(
            &path,
            format!("#!/bin/sh\nprintf '%s\\n' \"$*\" >> '{}'\n{}\n", log.display(), body),
        )
        .unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path.to_string_lossy().into_owned()
    }

    fn calls(dir: &Path) -> Vec<String> {
        std::fs::read_to_string(dir.join("calls.log"))
            .unwrap_or_default()
            .lines()
            .map(str::to_string)
            .collect()
    }

    fn stub_session(ssh_program: String) -> OpenSshSession {
        let control = tempfile::tempdir().unwrap();
        OpenSshSession {
            host: "db1".to_string(),
            destination: "deploy@db1".to_string(),
            port: 22,
            ssh_program,
            scp_program: "true".to_string(),
            socket: control.path().join("control.sock"),
            control: Mutex::new(Some(control)),
        }
    }

    /// Marker of a command started with `terminate_remote`.
    fn marker_of(call: &str) -> String {
        call.split_whitespace()
            .last()
            .filter(|m| m.starts_with("dbsync-op-"))
            .unwrap()
            .to_string()
    }

    #[tokio::test]
    async fn test_secrets_travel_on_stdin_not_argv() {
        let dir = tempfile::tempdir().unwrap();
        // Acts as the remote end: runs the requested shell locally.
        let ssh = stub_ssh(
            dir.path(),
            "while [ \"$#\" -gt 0 ] && [ \"$1\" != \"--\" ]; do shift; done\nshift\nexec sh -c \"$1\"",
        );
        let session = stub_session(ssh);

        let command = RemoteCommand::new("echo \"pw=$MYSQL_PWD\"")
            .with_secret("MYSQL_PWD", Secret::new("TopSecretPw"));
        let out = session
            .execute(&command, &ExecOptions::default())
            .await
            .unwrap();
        assert_eq!(out.exit_code, 0);
        assert_eq!(out.stdout.trim(), "pw=TopSecretPw");

        let calls = calls(dir.path());
        assert_eq!(calls.len(), 1);
        assert!(calls[0].ends_with("deploy@db1 -- sh -s"));
        assert!(!calls[0].contains("TopSecretPw"));
    }

    #[tokio::test]
    async fn test_timeout_terminates_remote_process_group() {
        let dir = tempfile::tempdir().unwrap();
        let ssh = stub_ssh(dir.path(), "case \"$*\" in *pgrep*) exit 0 ;; esac\nexec sleep 30");
        let session = stub_session(ssh);

        let options = ExecOptions::new(CancellationToken::new())
            .with_timeout(Some(Duration::from_millis(200)))
            .with_terminate_remote(true);
        let err = session
            .execute(&RemoteCommand::new("mysqldump shop"), &options)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Timeout { .. }));

        let calls = calls(dir.path());
        assert_eq!(calls.len(), 2);
        let marker = marker_of(&calls[0]);
        assert!(calls[0].contains(&format!("-- setsid -w sh -s {marker}")));
        assert!(calls[1].contains(&format!("pgrep -o -f '^sh -s {marker}'")));
        assert!(calls[1].contains("kill -TERM -- -$pid"));
    }

    #[tokio::test]
    async fn test_dropped_link_terminates_remote_process_group() {
        let dir = tempfile::tempdir().unwrap();
        let ssh = stub_ssh(
            dir.path(),
            "case \"$*\" in *pgrep*) exit 0 ;; esac\ncat > /dev/null\necho 'client_loop: send disconnect: Broken pipe' >&2\nexit 255",
        );
        let session = stub_session(ssh);

        let options = ExecOptions::default().with_terminate_remote(true);
        let err = session
            .execute(&RemoteCommand::new("mysqldump shop"), &options)
            .await
            .unwrap_err();
        assert!(err.is_transport_failure());

        let calls = calls(dir.path());
        assert_eq!(calls.len(), 2);
        let marker = marker_of(&calls[0]);
        assert!(calls[1].contains(&format!("'^sh -s {marker}'")));
    }

    #[tokio::test]
    async fn test_plain_commands_are_not_terminated() {
        let dir = tempfile::tempdir().unwrap();
        let ssh = stub_ssh(
            dir.path(),
            "cat > /dev/null\necho 'Connection reset by peer' >&2\nexit 255",
        );
        let session = stub_session(ssh);

        let err = session
            .execute(&RemoteCommand::new("true"), &ExecOptions::default())
            .await
            .unwrap_err();
        assert!(err.is_transport_failure());
        assert_eq!(calls(dir.path()).len(), 1);
    }

    #[test]
    fn test_script_input_wraps_exports_and_body() {
        let command = RemoteCommand::new("mysqldump shop")
            .with_secret("MYSQL_PWD", Secret::new("p w"));
        let input = String::from_utf8(script_input(&command)).unwrap();
        assert_eq!(input, "{\nexport MYSQL_PWD='p w'; mysqldump shop\n} </dev/null\n");
        assert_eq!(remote_shell(None), "sh -s");
    }
}
