//! Scripted doubles for the session, connector and database client.

#![allow(dead_code)]

use async_trait::async_trait;
use dbsync_core::artifact::section_marker;
use dbsync_core::command::RemoteCommand;
use dbsync_core::plan::restore::ImportStep;
use dbsync_core::profile::{
    ConnectionProfile, DatabaseEndpoint, Secret, SshAuth, SshEndpoint,
};
use dbsync_core::selection::Component;
use dbsync_core::session::{
    CommandOutput, ExecOptions, RemoteSession, SessionConnector, SqlClient,
};
use dbsync_core::{Result, SyncError};
use dbsync_execution::{RetryConfig, RetryPolicy};
use std::collections::VecDeque;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub fn profile(staging_dir: &Path) -> ConnectionProfile {
    ConnectionProfile {
        name: "Test".to_string(),
        ssh: SshEndpoint {
            host: "db1.example.com".to_string(),
            port: 22,
            user: "deploy".to_string(),
            auth: SshAuth::Password {
                password: Secret::new("ssh-pass"),
            },
            connect_timeout: Duration::from_secs(5),
        },
        source: DatabaseEndpoint {
            host: "127.0.0.1".to_string(),
            port: 3306,
            user: "backup".to_string(),
            password: Secret::new("export-pass"),
            database: "shop".to_string(),
        },
        destination: DatabaseEndpoint {
            host: "localhost".to_string(),
            port: 3306,
            user: "root".to_string(),
            password: Secret::new("import-pass"),
            database: "shop_copy".to_string(),
        },
        backup_dir: "/var/backups/mysql".to_string(),
        staging_dir: staging_dir.to_path_buf(),
    }
}

/// Three attempts without waiting between them.
pub fn fast_policy() -> RetryPolicy {
    RetryPolicy::new(RetryConfig {
        initial_delay: Duration::ZERO,
        ..RetryConfig::default()
    })
}

/// Gzip-compressed dump with one section per component.
pub fn gzip_dump(components: &[Component]) -> Vec<u8> {
    let mut body = String::new();
    for component in components {
        body.push_str(&section_marker(*component));
        body.push('\n');
        body.push_str(&format!("-- body of {component}\n"));
    }
    let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    encoder.write_all(body.as_bytes()).unwrap();
    encoder.finish().unwrap()
}

fn ok(stdout: impl Into<String>) -> Result<CommandOutput> {
    Ok(CommandOutput {
        exit_code: 0,
        stdout: stdout.into(),
        stderr: String::new(),
    })
}

fn failed(exit_code: i32, stderr: &str) -> Result<CommandOutput> {
    Ok(CommandOutput {
        exit_code,
        stdout: String::new(),
        stderr: stderr.to_string(),
    })
}

// ============================================================================
// Remote side
// ============================================================================

/// State of the source host, shared by every session the connector opens.
pub struct RemoteHost {
    pub version: String,
    pub database_size: u64,
    pub free_kilobytes: u64,
    /// Content served by `download`.
    pub artifact: Vec<u8>,
    /// Size `wc -c` reports; defaults to the artifact length.
    pub reported_size: Option<i64>,
    /// Bytes actually written by `download`; defaults to the whole artifact.
    pub delivered: Option<usize>,
    pub dump_result: (i32, String),
    pub delete_fails: bool,
    pub listing: String,
    /// Errors returned by upcoming `execute` calls before normal handling.
    pub execute_failures: VecDeque<SyncError>,
    /// Errors returned by upcoming dump runs only.
    pub dump_failures: VecDeque<SyncError>,
    pub executed: Vec<String>,
    /// `terminate_remote` of every dump run.
    pub dump_terminates: Vec<bool>,
    pub downloads: u32,
    pub uploads: Vec<(PathBuf, String)>,
    pub closes: u32,
}

impl Default for RemoteHost {
    fn default() -> Self {
        Self {
            version: "8.0.36".to_string(),
            database_size: 1024,
            free_kilobytes: 10_000_000,
            artifact: Vec::new(),
            reported_size: None,
            delivered: None,
            dump_result: (0, "4096\n".to_string()),
            delete_fails: false,
            listing: String::new(),
            execute_failures: VecDeque::new(),
            dump_failures: VecDeque::new(),
            executed: Vec::new(),
            dump_terminates: Vec::new(),
            downloads: 0,
            uploads: Vec::new(),
            closes: 0,
        }
    }
}

pub struct MockSession {
    host: Arc<Mutex<RemoteHost>>,
}

impl MockSession {
    fn respond(host: &mut RemoteHost, script: &str) -> Result<CommandOutput> {
        if script.contains("mysqldump") {
            let (code, out) = host.dump_result.clone();
            return if code == 0 { ok(out) } else { failed(code, &out) };
        }
        if script.contains("SELECT VERSION()") {
            return ok(format!("{}\n", host.version));
        }
        if script.contains("SHOW GRANTS") {
            return ok("GRANT SELECT ON `shop`.* TO `backup`@`%`\n");
        }
        if script.contains("SELECT COALESCE") {
            return ok(format!("{}\n", host.database_size));
        }
        if script.contains("SHOW VARIABLES") {
            return ok("character_set_server\tutf8mb4\n");
        }
        if script.contains("df -Pk") {
            return ok(format!(
                "/dev/sda1 41152736 20000000 {} 52% /\n",
                host.free_kilobytes
            ));
        }
        if script.contains("stat --printf") {
            return ok(host.listing.clone());
        }
        if script.contains("wc -c") {
            let size = host
                .reported_size
                .unwrap_or(host.artifact.len() as i64);
            return ok(format!("{size}\n"));
        }
        if script.contains("rm -f") {
            return if host.delete_fails {
                failed(1, "rm: cannot remove: Permission denied")
            } else {
                ok("")
            };
        }
        if script.contains("mkdir -p") {
            return ok("");
        }
        failed(127, "unexpected command")
    }
}

#[async_trait]
impl RemoteSession for MockSession {
    fn host(&self) -> &str {
        "db1.example.com"
    }

    async fn execute(&self, command: &RemoteCommand, options: &ExecOptions) -> Result<CommandOutput> {
        let mut host = self.host.lock().unwrap();
        host.executed.push(command.script().to_string());
        if let Some(err) = host.execute_failures.pop_front() {
            return Err(err);
        }
        if command.script().contains("mysqldump") {
            host.dump_terminates.push(options.terminate_remote);
            if let Some(err) = host.dump_failures.pop_front() {
                return Err(err);
            }
        }
        Self::respond(&mut host, command.script())
    }

    async fn download(&self, _remote: &str, local: &Path, _options: &ExecOptions) -> Result<()> {
        let mut host = self.host.lock().unwrap();
        host.downloads += 1;
        let len = host.delivered.unwrap_or(host.artifact.len());
        std::fs::write(local, &host.artifact[..len])?;
        Ok(())
    }

    async fn upload(&self, local: &Path, remote: &str, _options: &ExecOptions) -> Result<()> {
        let mut host = self.host.lock().unwrap();
        let bytes = std::fs::read(local)?;
        host.reported_size = Some(bytes.len() as i64);
        host.uploads.push((local.to_path_buf(), remote.to_string()));
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.host.lock().unwrap().closes += 1;
        Ok(())
    }
}

pub struct MockConnector {
    pub host: Arc<Mutex<RemoteHost>>,
    /// Failures returned by upcoming `open` calls, in order.
    pub open_failures: Mutex<VecDeque<SyncError>>,
    pub opens: Mutex<u32>,
}

impl MockConnector {
    pub fn new(host: RemoteHost) -> Self {
        Self {
            host: Arc::new(Mutex::new(host)),
            open_failures: Mutex::new(VecDeque::new()),
            opens: Mutex::new(0),
        }
    }

    pub fn failing_opens(self, failures: impl IntoIterator<Item = SyncError>) -> Self {
        self.open_failures.lock().unwrap().extend(failures);
        self
    }

    pub fn opens(&self) -> u32 {
        *self.opens.lock().unwrap()
    }

    pub fn executed(&self) -> Vec<String> {
        self.host.lock().unwrap().executed.clone()
    }

    pub fn with_host<R>(&self, f: impl FnOnce(&mut RemoteHost) -> R) -> R {
        f(&mut self.host.lock().unwrap())
    }
}

#[async_trait]
impl SessionConnector for MockConnector {
    async fn open(&self, _endpoint: &SshEndpoint) -> Result<Arc<dyn RemoteSession>> {
        *self.opens.lock().unwrap() += 1;
        if let Some(err) = self.open_failures.lock().unwrap().pop_front() {
            return Err(err);
        }
        Ok(Arc::new(MockSession {
            host: self.host.clone(),
        }))
    }
}

// ============================================================================
// Local client
// ============================================================================

#[derive(Debug, Clone)]
pub struct RecordedImport {
    pub component: Component,
    pub body: String,
    pub relaxed_integrity: bool,
}

pub struct MockClient {
    pub version: String,
    pub failing_component: Option<Component>,
    pub queries: Mutex<Vec<String>>,
    pub imports: Mutex<Vec<RecordedImport>>,
}

impl MockClient {
    pub fn new(version: &str) -> Self {
        Self {
            version: version.to_string(),
            failing_component: None,
            queries: Mutex::new(Vec::new()),
            imports: Mutex::new(Vec::new()),
        }
    }

    pub fn imports(&self) -> Vec<RecordedImport> {
        self.imports.lock().unwrap().clone()
    }

    pub fn imported_components(&self) -> Vec<Component> {
        self.imports().iter().map(|i| i.component).collect()
    }

    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().unwrap().clone()
    }
}

#[async_trait]
impl SqlClient for MockClient {
    async fn query(
        &self,
        _endpoint: &DatabaseEndpoint,
        sql: &str,
        _options: &ExecOptions,
    ) -> Result<CommandOutput> {
        self.queries.lock().unwrap().push(sql.to_string());
        if sql.contains("VERSION()") {
            ok(format!("{}\n", self.version))
        } else {
            ok("")
        }
    }

    async fn import(&self, step: &ImportStep, _options: &ExecOptions) -> Result<CommandOutput> {
        let body = std::fs::read_to_string(&step.source)?;
        self.imports.lock().unwrap().push(RecordedImport {
            component: step.component,
            body,
            relaxed_integrity: step.integrity.is_some(),
        });
        if self.failing_component == Some(step.component) {
            return failed(1, "ERROR 1064 (42000): You have an error in your SQL syntax");
        }
        ok("")
    }
}
