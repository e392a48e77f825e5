mod common;

use common::{MockClient, MockConnector, RemoteHost, fast_policy, gzip_dump, profile};
use dbsync_application::{CleanupReport, SyncService};
use dbsync_core::SyncError;
use dbsync_core::artifact::{ArtifactState, BackupArtifact};
use dbsync_core::error::TransferError;
use dbsync_core::selection::{BackupSpec, Component, Compression, RestoreSpec};
use dbsync_execution::{RetryConfig, RetryPolicy};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const ARTIFACT: &str = "/var/backups/mysql/shop-export-20240101-120000.sql.gz";

fn service(
    staging: &tempfile::TempDir,
    connector: &Arc<MockConnector>,
    client: &Arc<MockClient>,
) -> SyncService {
    SyncService::new(profile(staging.path()), connector.clone(), client.clone())
        .with_retry_policy(fast_policy())
}

fn full_dump_host() -> RemoteHost {
    RemoteHost {
        artifact: gzip_dump(&[
            Component::TableData,
            Component::Routines,
            Component::Triggers,
            Component::Views,
            Component::Events,
        ]),
        ..RemoteHost::default()
    }
}

// ============================================================================
// Restore
// ============================================================================

#[tokio::test]
async fn restore_applies_table_data_first_then_fixed_order() {
    let staging = tempfile::tempdir().unwrap();
    let connector = Arc::new(MockConnector::new(full_dump_host()));
    let client = Arc::new(MockClient::new("8.0.36"));

    let spec = RestoreSpec::tables_only()
        .with(Component::Events)
        .with(Component::Views)
        .with(Component::Triggers)
        .with(Component::Routines);
    let outcome = service(&staging, &connector, &client)
        .restore_backup(BackupArtifact::existing(ARTIFACT).unwrap(), &spec)
        .await
        .unwrap();

    let expected = vec![
        Component::TableData,
        Component::Routines,
        Component::Triggers,
        Component::Views,
        Component::Events,
    ];
    assert_eq!(outcome.restored, expected);
    assert_eq!(client.imported_components(), expected);

    let imports = client.imports();
    assert!(imports[0].relaxed_integrity);
    assert!(imports[1..].iter().all(|i| !i.relaxed_integrity));
    assert_eq!(imports[2].body, "-- body of triggers\n");

    assert_eq!(outcome.artifact.state(), ArtifactState::Consumed);
    assert_eq!(outcome.cleanup, CleanupReport::NotRequested);
    assert!(connector.with_host(|h| h.closes) >= 1);
}

#[tokio::test]
async fn restore_never_includes_unrequested_components() {
    let staging = tempfile::tempdir().unwrap();
    let connector = Arc::new(MockConnector::new(full_dump_host()));
    let client = Arc::new(MockClient::new("8.0.36"));

    let outcome = service(&staging, &connector, &client)
        .restore_backup(
            BackupArtifact::existing(ARTIFACT).unwrap(),
            &RestoreSpec::tables_only().with(Component::Views),
        )
        .await
        .unwrap();
    assert_eq!(
        client.imported_components(),
        vec![Component::TableData, Component::Views]
    );
    assert_eq!(outcome.restored.len(), 2);
}

#[tokio::test]
async fn missing_component_fails_before_any_sql() {
    let staging = tempfile::tempdir().unwrap();
    let connector = Arc::new(MockConnector::new(RemoteHost {
        artifact: gzip_dump(&[Component::TableData]),
        ..RemoteHost::default()
    }));
    let client = Arc::new(MockClient::new("8.0.36"));

    let err = service(&staging, &connector, &client)
        .restore_backup(
            BackupArtifact::existing(ARTIFACT).unwrap(),
            &RestoreSpec::tables_only()
                .with(Component::Triggers)
                .with(Component::Events),
        )
        .await
        .unwrap_err();

    assert_eq!(
        err,
        SyncError::PartialSource {
            missing: vec![Component::Triggers, Component::Events]
        }
    );
    assert!(client.imports().is_empty());
    assert!(client.queries().is_empty());
}

#[tokio::test]
async fn unsectioned_dump_counts_as_table_data_only() {
    let staging = tempfile::tempdir().unwrap();
    let connector = Arc::new(MockConnector::new(RemoteHost {
        artifact: b"-- MySQL dump 10.13\nCREATE TABLE t (id INT);\n".to_vec(),
        ..RemoteHost::default()
    }));
    let client = Arc::new(MockClient::new("5.7.44-log"));
    let svc = service(&staging, &connector, &client);

    let plain = "/var/backups/mysql/legacy.sql";
    let outcome = svc
        .restore_backup(BackupArtifact::existing(plain).unwrap(), &RestoreSpec::tables_only())
        .await
        .unwrap();
    assert_eq!(outcome.restored, vec![Component::TableData]);

    let err = svc
        .restore_backup(
            BackupArtifact::existing(plain).unwrap(),
            &RestoreSpec::tables_only().with(Component::Routines),
        )
        .await
        .unwrap_err();
    assert!(err.is_partial_source());
}

#[tokio::test]
async fn unsupported_destination_component_is_a_planning_failure() {
    let staging = tempfile::tempdir().unwrap();
    let connector = Arc::new(MockConnector::new(full_dump_host()));
    let client = Arc::new(MockClient::new("5.6.51"));

    let err = service(&staging, &connector, &client)
        .restore_backup(
            BackupArtifact::existing(ARTIFACT).unwrap(),
            &RestoreSpec::everything(),
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        SyncError::Unsupported {
            component: Component::Events,
            ..
        }
    ));
    assert!(client.imports().is_empty());
}

#[tokio::test]
async fn size_mismatch_is_fatal_and_not_retried() {
    let staging = tempfile::tempdir().unwrap();
    let artifact = gzip_dump(&[Component::TableData]);
    let connector = Arc::new(MockConnector::new(RemoteHost {
        reported_size: Some(artifact.len() as i64),
        delivered: Some(artifact.len() - 1),
        artifact,
        ..RemoteHost::default()
    }));
    let client = Arc::new(MockClient::new("8.0.36"));

    let err = service(&staging, &connector, &client)
        .restore_backup(
            BackupArtifact::existing(ARTIFACT).unwrap(),
            &RestoreSpec::tables_only(),
        )
        .await
        .unwrap_err();
    match err {
        SyncError::Transfer(TransferError::SizeMismatch {
            expected, actual, ..
        }) => assert_eq!(expected, actual + 1),
        other => panic!("expected size mismatch, got {other:?}"),
    }
    assert_eq!(connector.with_host(|h| h.downloads), 1);
    assert!(client.imports().is_empty());
}

#[tokio::test]
async fn corrupt_artifact_is_rejected() {
    let staging = tempfile::tempdir().unwrap();
    let connector = Arc::new(MockConnector::new(RemoteHost {
        artifact: b"definitely not gzip".to_vec(),
        ..RemoteHost::default()
    }));
    let client = Arc::new(MockClient::new("8.0.36"));

    let err = service(&staging, &connector, &client)
        .restore_backup(
            BackupArtifact::existing(ARTIFACT).unwrap(),
            &RestoreSpec::tables_only(),
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        SyncError::Transfer(TransferError::Corrupt { .. })
    ));
}

#[tokio::test]
async fn missing_remote_file_is_reported() {
    let staging = tempfile::tempdir().unwrap();
    let connector = Arc::new(MockConnector::new(RemoteHost {
        reported_size: Some(-1),
        ..RemoteHost::default()
    }));
    let client = Arc::new(MockClient::new("8.0.36"));

    let err = service(&staging, &connector, &client)
        .restore_backup(
            BackupArtifact::existing(ARTIFACT).unwrap(),
            &RestoreSpec::tables_only(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::Validation { .. }));
    assert_eq!(connector.with_host(|h| h.downloads), 0);
}

#[tokio::test]
async fn failed_cleanup_is_reported_without_failing_the_restore() {
    let staging = tempfile::tempdir().unwrap();
    let connector = Arc::new(MockConnector::new(RemoteHost {
        delete_fails: true,
        ..full_dump_host()
    }));
    let client = Arc::new(MockClient::new("8.0.36"));

    let outcome = service(&staging, &connector, &client)
        .restore_backup(
            BackupArtifact::existing(ARTIFACT)
                .unwrap()
                .with_delete_after_transfer(true),
            &RestoreSpec::tables_only(),
        )
        .await
        .unwrap();

    match &outcome.cleanup {
        CleanupReport::Failed { error } => {
            assert!(error.is_cleanup());
            assert!(error.to_string().contains(ARTIFACT));
        }
        other => panic!("expected failed cleanup, got {other:?}"),
    }
    assert!(!outcome.artifact.remote_removed());
    assert_eq!(outcome.artifact.state(), ArtifactState::Consumed);
}

#[tokio::test]
async fn successful_cleanup_marks_remote_removed() {
    let staging = tempfile::tempdir().unwrap();
    let connector = Arc::new(MockConnector::new(full_dump_host()));
    let client = Arc::new(MockClient::new("8.0.36"));

    let outcome = service(&staging, &connector, &client)
        .restore_backup(
            BackupArtifact::existing(ARTIFACT)
                .unwrap()
                .with_delete_after_transfer(true),
            &RestoreSpec::tables_only(),
        )
        .await
        .unwrap();
    assert_eq!(outcome.cleanup, CleanupReport::Removed);
    assert!(outcome.artifact.remote_removed());
    assert!(
        connector
            .executed()
            .iter()
            .any(|s| s.starts_with("rm -f -- ") && s.contains("shop-export-20240101-120000.sql.gz"))
    );
}

#[tokio::test]
async fn import_failure_stops_the_restore() {
    let staging = tempfile::tempdir().unwrap();
    let connector = Arc::new(MockConnector::new(full_dump_host()));
    let client = Arc::new(MockClient {
        failing_component: Some(Component::Triggers),
        ..MockClient::new("8.0.36")
    });

    let err = service(&staging, &connector, &client)
        .restore_backup(
            BackupArtifact::existing(ARTIFACT).unwrap(),
            &RestoreSpec::everything(),
        )
        .await
        .unwrap_err();
    match err {
        SyncError::Execution {
            exit_code, stderr, ..
        } => {
            assert_eq!(exit_code, Some(1));
            assert!(stderr.contains("ERROR 1064"));
        }
        other => panic!("expected execution error, got {other:?}"),
    }
    assert_eq!(
        client.imported_components(),
        vec![Component::TableData, Component::Routines, Component::Triggers]
    );
}

#[tokio::test]
async fn staging_directory_is_cleaned_up() {
    let staging = tempfile::tempdir().unwrap();
    let connector = Arc::new(MockConnector::new(full_dump_host()));
    let client = Arc::new(MockClient::new("8.0.36"));

    service(&staging, &connector, &client)
        .restore_backup(
            BackupArtifact::existing(ARTIFACT).unwrap(),
            &RestoreSpec::tables_only(),
        )
        .await
        .unwrap();
    assert_eq!(std::fs::read_dir(staging.path()).unwrap().count(), 0);
}

// ============================================================================
// Connection retries
// ============================================================================

#[tokio::test]
async fn three_connection_failures_surface_the_last_message() {
    let staging = tempfile::tempdir().unwrap();
    let connector = Arc::new(MockConnector::new(RemoteHost::default()).failing_opens([
        SyncError::network("db1.example.com", "Connection refused"),
        SyncError::auth("db1.example.com", "Permission denied (publickey)"),
        SyncError::network("db1.example.com", "Connection timed out"),
    ]));
    let client = Arc::new(MockClient::new("8.0.36"));

    let err = service(&staging, &connector, &client)
        .list_existing_backups()
        .await
        .unwrap_err();
    assert_eq!(
        err,
        SyncError::network("db1.example.com", "Connection timed out")
    );
    assert_eq!(
        err.to_string(),
        "Failed to connect to db1.example.com: Connection timed out"
    );
    assert_eq!(connector.opens(), 3);
}

#[tokio::test]
async fn rejected_credentials_are_retried_with_a_fresh_handshake() {
    let staging = tempfile::tempdir().unwrap();
    let connector = Arc::new(
        MockConnector::new(RemoteHost {
            listing: format!("2048\t1704110400\t{ARTIFACT}\n"),
            ..RemoteHost::default()
        })
        .failing_opens([SyncError::auth("db1.example.com", "Permission denied")]),
    );
    let client = Arc::new(MockClient::new("8.0.36"));

    let entries = service(&staging, &connector, &client)
        .list_existing_backups()
        .await
        .unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(connector.opens(), 2);
}

#[tokio::test]
async fn dropped_link_reopens_the_session() {
    let staging = tempfile::tempdir().unwrap();
    let connector = Arc::new(MockConnector::new(RemoteHost {
        execute_failures: [SyncError::network("db1.example.com", "Broken pipe")].into(),
        ..RemoteHost::default()
    }));
    let client = Arc::new(MockClient::new("8.0.36"));

    let info = service(&staging, &connector, &client)
        .detect_server_info()
        .await
        .unwrap();
    assert_eq!(info.engine.version.major, 8);
    assert_eq!(connector.opens(), 2);
}

#[tokio::test]
async fn cancellation_interrupts_backoff() {
    let staging = tempfile::tempdir().unwrap();
    let connector = Arc::new(MockConnector::new(RemoteHost::default()).failing_opens([
        SyncError::network("db1.example.com", "Connection refused"),
        SyncError::network("db1.example.com", "Connection refused"),
    ]));
    let client = Arc::new(MockClient::new("8.0.36"));
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = SyncService::new(profile(staging.path()), connector.clone(), client)
        .with_retry_policy(RetryPolicy::new(RetryConfig {
            initial_delay: Duration::from_secs(3600),
            ..RetryConfig::default()
        }))
        .with_cancellation(cancel)
        .list_existing_backups()
        .await
        .unwrap_err();
    assert!(err.is_cancelled());
    assert_eq!(connector.opens(), 1);
}

// ============================================================================
// Backup, listing, push
// ============================================================================

#[tokio::test]
async fn create_backup_runs_one_version_specific_dump() {
    let staging = tempfile::tempdir().unwrap();
    let connector = Arc::new(MockConnector::new(RemoteHost::default()));
    let client = Arc::new(MockClient::new("8.0.36"));

    let spec = BackupSpec::tables_only()
        .with_component(Component::Routines, true)
        .with_component(Component::Views, true)
        .with_compression(Compression::Gzip)
        .with_file_name("nightly.sql.gz");
    let outcome = service(&staging, &connector, &client)
        .create_backup(&spec)
        .await
        .unwrap();

    assert_eq!(outcome.artifact.state(), ArtifactState::Created);
    assert_eq!(outcome.artifact.size(), Some(4096));
    assert_eq!(
        outcome.artifact.remote_path(),
        "/var/backups/mysql/nightly.sql.gz"
    );
    assert_eq!(
        outcome.components,
        vec![Component::TableData, Component::Routines, Component::Views]
    );
    assert!(!outcome.privileged);

    let executed = connector.executed();
    let dumps: Vec<&String> = executed.iter().filter(|s| s.contains("mysqldump")).collect();
    assert_eq!(dumps.len(), 1);
    let dump = dumps[0];
    assert!(dump.contains("--column-statistics=0"));
    assert!(dump.contains("gzip -c"));
    assert!(!dump.contains("--triggers "));
    assert!(!dump.contains("--events"));
    assert!(!dump.contains("export-pass"));
    assert!(client.queries().is_empty());
}

#[tokio::test]
async fn dump_retried_after_dropped_link_uses_fresh_temp_files() {
    let staging = tempfile::tempdir().unwrap();
    let connector = Arc::new(MockConnector::new(RemoteHost {
        dump_failures: [SyncError::network("db1.example.com", "Broken pipe")].into(),
        ..RemoteHost::default()
    }));
    let client = Arc::new(MockClient::new("8.0.36"));

    let outcome = service(&staging, &connector, &client)
        .create_backup(
            &BackupSpec::tables_only()
                .with_compression(Compression::Gzip)
                .with_file_name("nightly.sql.gz"),
        )
        .await
        .unwrap();
    assert_eq!(outcome.artifact.size(), Some(4096));
    assert_eq!(connector.opens(), 2);

    // Both runs are stoppable remotely and never share temporary paths.
    assert_eq!(connector.with_host(|h| h.dump_terminates.clone()), vec![true, true]);
    let executed = connector.executed();
    let dumps: Vec<&String> = executed.iter().filter(|s| s.contains("mysqldump")).collect();
    assert_eq!(dumps.len(), 2);
    assert!(dumps[1].contains("/var/backups/mysql/nightly.sql.gz.part.$$"));
    assert!(!dumps[1].contains("nightly.sql.gz.part "));
}

#[tokio::test]
async fn dump_failure_is_not_retried() {
    let staging = tempfile::tempdir().unwrap();
    let connector = Arc::new(MockConnector::new(RemoteHost {
        dump_result: (2, "mysqldump: Got error: 1044: Access denied".to_string()),
        ..RemoteHost::default()
    }));
    let client = Arc::new(MockClient::new("8.0.36"));

    let err = service(&staging, &connector, &client)
        .create_backup(&BackupSpec::tables_only())
        .await
        .unwrap_err();
    match err {
        SyncError::Execution {
            command,
            exit_code,
            stderr,
        } => {
            assert_eq!(exit_code, Some(2));
            assert!(stderr.contains("Access denied"));
            assert!(!command.contains("export-pass"));
        }
        other => panic!("expected execution error, got {other:?}"),
    }
    let dumps = connector
        .executed()
        .iter()
        .filter(|s| s.contains("mysqldump"))
        .count();
    assert_eq!(dumps, 1);
}

#[tokio::test]
async fn insufficient_remote_space_stops_the_dump() {
    let staging = tempfile::tempdir().unwrap();
    let connector = Arc::new(MockConnector::new(RemoteHost {
        database_size: 10 * 1024 * 1024,
        free_kilobytes: 1024,
        ..RemoteHost::default()
    }));
    let client = Arc::new(MockClient::new("8.0.36"));

    let err = service(&staging, &connector, &client)
        .create_backup(&BackupSpec::tables_only())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        SyncError::Transfer(TransferError::InsufficientSpace {
            available: 1_048_576,
            ..
        })
    ));
    assert!(!connector.executed().iter().any(|s| s.contains("mysqldump")));
}

#[tokio::test]
async fn unsupported_source_component_fails_before_dumping() {
    let staging = tempfile::tempdir().unwrap();
    let connector = Arc::new(MockConnector::new(RemoteHost {
        version: "10.6.12-MariaDB".to_string(),
        ..RemoteHost::default()
    }));
    let client = Arc::new(MockClient::new("8.0.36"));

    let err = service(&staging, &connector, &client)
        .create_backup(&BackupSpec::tables_only().with_component(Component::Events, true))
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::Unsupported { .. }));
    assert!(!connector.executed().iter().any(|s| s.contains("mysqldump")));
}

#[tokio::test]
async fn list_returns_newest_first() {
    let staging = tempfile::tempdir().unwrap();
    let connector = Arc::new(MockConnector::new(RemoteHost {
        listing: "100\t1704067200\t/var/backups/mysql/shop-export-20240101-000000.sql\n\
                  200\t1704153600\t/var/backups/mysql/shop-export-20240102-000000.sql.gz\n"
            .to_string(),
        ..RemoteHost::default()
    }));
    let client = Arc::new(MockClient::new("8.0.36"));

    let entries = service(&staging, &connector, &client)
        .list_existing_backups()
        .await
        .unwrap();
    let names: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();
    assert_eq!(
        names,
        vec![
            "shop-export-20240102-000000.sql.gz",
            "shop-export-20240101-000000.sql"
        ]
    );
    assert_eq!(entries[0].compression, Compression::Gzip);
    assert_eq!(entries[1].size_bytes, 100);
}

#[tokio::test]
async fn push_uploads_only_when_sizes_differ() {
    let staging = tempfile::tempdir().unwrap();
    let local = staging.path().join("manual.sql");
    std::fs::write(&local, "CREATE TABLE t (id INT);\n").unwrap();

    let connector = Arc::new(MockConnector::new(RemoteHost {
        reported_size: Some(-1),
        ..RemoteHost::default()
    }));
    let client = Arc::new(MockClient::new("8.0.36"));
    let svc = service(&staging, &connector, &client);

    let first = svc.push_backup(&local).await.unwrap();
    assert!(first.uploaded);
    assert_eq!(first.remote_path, "/var/backups/mysql/manual.sql");

    let second = svc.push_backup(&local).await.unwrap();
    assert!(!second.uploaded);
    assert_eq!(connector.with_host(|h| h.uploads.len()), 1);
}
