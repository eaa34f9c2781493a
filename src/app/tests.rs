use super::*;
use crate::config::FfwardenConfig;
use crate::error::{FfwardenError, ProcessError};
use crate::health::ShutdownReason;
use crate::record::TimestampedLine;
use std::os::unix::fs::PermissionsExt;
use std::time::Duration;
use tempfile::TempDir;

fn write_encoder_script(dir: &std::path::Path, body: &str) -> String {
    let path = dir.join("fake-encoder.sh");
    std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path.to_string_lossy().into_owned()
}

fn create_test_config(dir: &TempDir, binary: String) -> FfwardenConfig {
    let mut config = FfwardenConfig::default();
    config.process.binary = binary;
    config.process.workdir = dir.path().join("work").to_string_lossy().into_owned();
    config.process.shutdown_timeout_secs = 2;
    config.buffers.progress_capacity = 64;
    config.buffers.stdout_capacity = 64;
    config.monitor.start_delay_secs = 0;
    config.monitor.poll_interval_ms = 100;
    config.logs.path = dir.path().join("logs").to_string_lossy().into_owned();
    config.logs.rotation = "never".to_string();
    config.logs.drain_interval_ms = 50;
    config.query.host = "127.0.0.1".to_string();
    config.query.port = 0;
    config.system.tail_lines = 3;
    config
}

#[test]
fn test_orchestrator_creation_fills_status_fields() {
    let dir = TempDir::new().unwrap();
    let config = create_test_config(&dir, "ffmpeg".to_string());
    let orchestrator =
        FfwardenOrchestrator::new(config, "-i in.ts -f null -", "0123456789abcdef0123".to_string());

    let fields = orchestrator.status().fields();
    assert_eq!(fields.pid, std::process::id());
    assert_eq!(fields.container_id, "0123456789abcdef0123");
    assert_eq!(fields.args, "-i in.ts -f null -");
    assert_eq!(fields.ffmpeg_pid, None);
    assert!(fields.logs_path.ends_with("ffwarden_0123456789abc"));
    assert_eq!(orchestrator.supervisor().args(), "-i in.ts -f null -");
    assert!(orchestrator.logs_dir().ends_with("ffwarden_0123456789abc"));
}

#[tokio::test]
async fn test_component_state_management() {
    let dir = TempDir::new().unwrap();
    let orchestrator = FfwardenOrchestrator::new(
        create_test_config(&dir, "ffmpeg".to_string()),
        "",
        String::new(),
    );
    assert!(orchestrator.get_all_component_states().await.is_empty());

    orchestrator
        .set_component_state("encoder", ComponentState::Starting)
        .await;
    orchestrator
        .set_component_state("query", ComponentState::Failed)
        .await;
    orchestrator
        .set_component_state("encoder", ComponentState::Running)
        .await;

    assert_eq!(
        orchestrator.get_component_state("encoder").await,
        Some(ComponentState::Running)
    );
    let all_states = orchestrator.get_all_component_states().await;
    assert_eq!(all_states.len(), 2);
    assert_eq!(all_states.get("query"), Some(&ComponentState::Failed));
}

#[tokio::test]
async fn test_initialize_writes_status_directory() {
    let dir = TempDir::new().unwrap();
    let mut orchestrator = FfwardenOrchestrator::new(
        create_test_config(&dir, "ffmpeg".to_string()),
        "-i in.ts",
        String::new(),
    );

    orchestrator.initialize().await.unwrap();

    let status_dir = dir.path().join("work").join("status");
    assert_eq!(
        std::fs::read_to_string(status_dir.join("PID")).unwrap(),
        std::process::id().to_string()
    );
    assert_eq!(
        std::fs::read_to_string(status_dir.join("ARGS")).unwrap(),
        "-i in.ts"
    );
    assert_eq!(
        orchestrator.get_component_state("status").await,
        Some(ComponentState::Running)
    );
}

#[tokio::test]
async fn test_initialize_refuses_busy_workdir() {
    let dir = TempDir::new().unwrap();
    let status_dir = dir.path().join("work").join("status");
    std::fs::create_dir_all(&status_dir).unwrap();
    let mut other = std::process::Command::new("sleep").arg("10").spawn().unwrap();
    std::fs::write(status_dir.join("PID"), other.id().to_string()).unwrap();

    let mut orchestrator = FfwardenOrchestrator::new(
        create_test_config(&dir, "ffmpeg".to_string()),
        "-i in.ts",
        String::new(),
    );
    let result = orchestrator.initialize().await;

    other.kill().unwrap();
    other.wait().unwrap();

    let error = result.unwrap_err();
    assert!(matches!(
        error,
        FfwardenError::Process(ProcessError::WorkdirBusy { .. })
    ));
    assert_eq!(exit_code(&Err(error)), EXIT_LAUNCH_FAILURE);
}

#[tokio::test]
async fn test_missing_binary_is_a_launch_failure() {
    let dir = TempDir::new().unwrap();
    let mut orchestrator = FfwardenOrchestrator::new(
        create_test_config(&dir, "ffwarden-no-such-encoder".to_string()),
        "-i in.ts",
        String::new(),
    );
    orchestrator.initialize().await.unwrap();

    let outcome = orchestrator.start().await.map(|_| ShutdownReason::Finished);
    assert!(outcome.is_err());
    assert_eq!(
        orchestrator.get_component_state("encoder").await,
        Some(ComponentState::Failed)
    );
    assert_eq!(orchestrator.shutdown(&outcome).await, EXIT_LAUNCH_FAILURE);
}

#[test]
fn test_exit_codes() {
    assert_eq!(exit_code(&Ok(ShutdownReason::Finished)), EXIT_TERMINATED);
    assert_eq!(
        exit_code(&Ok(ShutdownReason::Signal("SIGTERM".to_string()))),
        EXIT_TERMINATED
    );
    assert_eq!(
        exit_code(&Err(FfwardenError::system("monitor task failed"))),
        EXIT_TERMINATED
    );
}

#[test]
fn test_stdout_tail_is_bounded() {
    let dir = TempDir::new().unwrap();
    let orchestrator = FfwardenOrchestrator::new(
        create_test_config(&dir, "ffmpeg".to_string()),
        "",
        String::new(),
    );
    let buffer = orchestrator.supervisor().stdout_buffer();
    for i in 0..5 {
        buffer.append(TimestampedLine::new(format!("line {}", i)));
    }

    let tail = orchestrator.stdout_tail();
    assert_eq!(tail.len(), 3);
    assert!(tail[0].ends_with("> line 2"));
    assert!(tail[2].ends_with("> line 4"));
}

#[tokio::test]
async fn test_full_run_of_finishing_encoder() {
    let dir = TempDir::new().unwrap();
    let script = write_encoder_script(dir.path(), "echo first\nsleep 0.3\necho done\nexit 0");
    let mut orchestrator =
        FfwardenOrchestrator::new(create_test_config(&dir, script), "", String::new());

    orchestrator.initialize().await.unwrap();
    orchestrator.start().await.unwrap();

    let status_dir = dir.path().join("work").join("status");
    let ffmpeg_pid = std::fs::read_to_string(status_dir.join("FFMPEG_PID")).unwrap();
    assert_eq!(
        ffmpeg_pid,
        orchestrator.supervisor().pid().unwrap().to_string()
    );
    let http_port = std::fs::read_to_string(status_dir.join("HTTP_PORT")).unwrap();
    assert!(http_port.parse::<u16>().unwrap() > 0);
    assert!(!std::fs::read_to_string(status_dir.join("START_TIME"))
        .unwrap()
        .is_empty());

    let outcome = tokio::time::timeout(Duration::from_secs(10), orchestrator.run())
        .await
        .unwrap();
    assert_eq!(outcome.as_ref().unwrap(), &ShutdownReason::Finished);
    assert_eq!(orchestrator.shutdown(&outcome).await, EXIT_TERMINATED);

    assert!(orchestrator.supervisor().is_finished());
    assert_eq!(
        orchestrator.get_component_state("sink").await,
        Some(ComponentState::Running)
    );

    let logs: Vec<_> = std::fs::read_dir(orchestrator.logs_dir())
        .unwrap()
        .map(|entry| entry.unwrap().path())
        .collect();
    assert_eq!(logs.len(), 1);
    let name = logs[0].file_name().unwrap().to_string_lossy().into_owned();
    assert!(name.starts_with("ffmpeg_"));
    assert!(name.ends_with(".log"));

    let content = std::fs::read_to_string(&logs[0]).unwrap();
    assert!(content.contains("> first\n"));
    assert!(content.contains("> done\n"));
}

#[tokio::test]
async fn test_run_twice_is_an_error() {
    let dir = TempDir::new().unwrap();
    let script = write_encoder_script(dir.path(), "exit 0");
    let mut config = create_test_config(&dir, script);
    config.query.enabled = false;
    config.logs.file_log = false;
    let mut orchestrator = FfwardenOrchestrator::new(config, "", String::new());

    orchestrator.start().await.unwrap();
    let first = tokio::time::timeout(Duration::from_secs(10), orchestrator.run())
        .await
        .unwrap();
    assert!(first.is_ok());

    assert!(orchestrator.run().await.is_err());
    orchestrator.shutdown(&first).await;
}
