use super::types::ComponentState;
use crate::config::FfwardenConfig;
use crate::health::{HealthMonitor, MonitorPhase};
use crate::process::ProcessSupervisor;
use crate::status::{StatusFields, StatusFiles};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{Mutex, Notify};
use tokio_util::sync::CancellationToken;

/// Wires the supervisor, monitor, sink, status files and query server together
pub struct FfwardenOrchestrator {
    pub(super) config: FfwardenConfig,
    pub(super) supervisor: Arc<ProcessSupervisor>,
    pub(super) status: Arc<StatusFiles>,
    pub(super) logs_dir: PathBuf,

    // Components
    pub(super) monitor: Option<HealthMonitor>,
    pub(super) phase: Arc<RwLock<MonitorPhase>>,
    pub(super) sink_reopen: Option<Arc<Notify>>,

    // Lifecycle management
    pub(super) component_states: Arc<Mutex<HashMap<&'static str, ComponentState>>>,
    pub(super) cancellation_token: CancellationToken,
}

impl FfwardenOrchestrator {
    /// Create an orchestrator for one encoder run; nothing is launched yet
    pub fn new(config: FfwardenConfig, args: impl Into<String>, container_id: String) -> Self {
        let args = args.into();
        let own_pid = std::process::id();
        let logs_dir = config.logs_dir(&container_id, own_pid);

        let status = Arc::new(StatusFiles::new(
            config.status_dir(),
            StatusFields {
                container_name: config.system.container_name.clone(),
                container_id,
                pid: own_pid,
                ffmpeg_pid: None,
                workdir: config.process.workdir.clone(),
                logs_path: logs_dir.to_string_lossy().into_owned(),
                http_host: config.query.host.clone(),
                http_port: None,
                start_time: None,
                args: args.clone(),
            },
        ));

        let supervisor = Arc::new(ProcessSupervisor::new(&config, args));
        let cancellation_token = CancellationToken::new();
        let monitor = HealthMonitor::new(
            Arc::clone(&supervisor),
            config.monitor.clone(),
            cancellation_token.child_token(),
        );
        let phase = monitor.phase_handle();

        Self {
            config,
            supervisor,
            status,
            logs_dir,
            monitor: Some(monitor),
            phase,
            sink_reopen: None,
            component_states: Arc::new(Mutex::new(HashMap::new())),
            cancellation_token,
        }
    }

    pub fn supervisor(&self) -> Arc<ProcessSupervisor> {
        Arc::clone(&self.supervisor)
    }

    pub fn status(&self) -> Arc<StatusFiles> {
        Arc::clone(&self.status)
    }

    /// Directory receiving the encoder log files
    pub fn logs_dir(&self) -> &PathBuf {
        &self.logs_dir
    }
}
