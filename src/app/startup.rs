use super::{ComponentState, FfwardenOrchestrator};
use crate::error::Result;
use crate::process::stream_id;
use crate::sink::{RollingFileSink, TelemetrySink};
use std::sync::Arc;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info};

impl FfwardenOrchestrator {
    /// Claim the workdir and publish the initial status
    pub async fn initialize(&mut self) -> Result<()> {
        info!("Initializing ffwarden components");

        let mut states = self.component_states.lock().await;
        states.insert("status", ComponentState::Stopped);
        states.insert("encoder", ComponentState::Stopped);
        states.insert("monitor", ComponentState::Stopped);
        if self.config.logs.file_log {
            states.insert("sink", ComponentState::Stopped);
        }
        if self.config.query.enabled {
            states.insert("query", ComponentState::Stopped);
        }
        drop(states);

        self.set_component_state("status", ComponentState::Starting)
            .await;
        if let Err(e) = self.status.ensure_not_running() {
            self.set_component_state("status", ComponentState::Failed)
                .await;
            return Err(e.into());
        }
        self.status.save()?;
        self.set_component_state("status", ComponentState::Running)
            .await;

        info!("Status written to {}", self.status.dir().display());
        Ok(())
    }

    /// Launch the encoder and every consumer of its telemetry
    pub async fn start(&mut self) -> Result<()> {
        info!("Starting ffwarden");

        self.set_component_state("encoder", ComponentState::Starting)
            .await;
        let handle = match self.supervisor.start() {
            Ok(handle) => handle,
            Err(e) => {
                error!("Failed to start encoder: {}", e);
                self.set_component_state("encoder", ComponentState::Failed)
                    .await;
                return Err(e);
            }
        };
        self.set_component_state("encoder", ComponentState::Running)
            .await;

        self.status.update(|fields| {
            fields.ffmpeg_pid = handle.pid;
            fields.start_time = Some(handle.started_at);
        })?;

        if self.config.logs.file_log {
            self.start_sink(handle.started_at).await?;
        }

        #[cfg(feature = "query")]
        if self.config.query.enabled {
            self.start_query_server().await?;
        }

        info!("ffwarden started");
        Ok(())
    }

    async fn start_sink(&mut self, started_at: chrono::DateTime<chrono::Local>) -> Result<()> {
        self.set_component_state("sink", ComponentState::Starting)
            .await;
        let prefix = format!(
            "ffmpeg_{}",
            stream_id(self.supervisor.args(), Some(started_at))
        );
        let file = RollingFileSink::new(&self.config.logs, &self.logs_dir, &prefix)?;
        let sink = TelemetrySink::new(
            self.supervisor.stdout_buffer(),
            file,
            self.config.logs.drain_interval(),
            self.supervisor.shutdown_token(),
        );
        self.sink_reopen = Some(sink.reopen_handle());

        self.supervisor.track_task("log sink", tokio::spawn(sink.run()));
        self.watch_sighup()?;

        self.set_component_state("sink", ComponentState::Running)
            .await;
        Ok(())
    }

    /// SIGHUP rolls the encoder log over to a numbered backup
    fn watch_sighup(&self) -> Result<()> {
        let Some(reopen) = self.sink_reopen.as_ref().map(Arc::clone) else {
            return Ok(());
        };

        let mut hangup = signal(SignalKind::hangup())?;
        let token = self.supervisor.shutdown_token();
        self.supervisor.track_task(
            "sighup watcher",
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = token.cancelled() => break,
                        received = hangup.recv() => {
                            if received.is_none() {
                                break;
                            }
                            info!("Received SIGHUP, rolling over encoder log");
                            reopen.notify_one();
                        }
                    }
                }
            }),
        );

        Ok(())
    }

    #[cfg(feature = "query")]
    async fn start_query_server(&mut self) -> Result<()> {
        use crate::query::QueryServerBuilder;

        self.set_component_state("query", ComponentState::Starting)
            .await;

        let server = QueryServerBuilder::new()
            .config(self.config.query.clone())
            .supervisor(Arc::clone(&self.supervisor))
            .status(Arc::clone(&self.status))
            .phase(Arc::clone(&self.phase))
            .build()?;

        let (listener, port) = match server.bind().await {
            Ok(bound) => bound,
            Err(e) => {
                error!("HTTP server not started: {}", e);
                self.set_component_state("query", ComponentState::Failed)
                    .await;
                return Err(e);
            }
        };
        self.status.update(|fields| fields.http_port = Some(port))?;

        let token = self.supervisor.shutdown_token();
        self.supervisor.track_task(
            "query server",
            tokio::spawn(async move {
                if let Err(e) = server.serve(listener, token).await {
                    error!("HTTP server failed: {}", e);
                }
            }),
        );

        self.set_component_state("query", ComponentState::Running)
            .await;
        Ok(())
    }
}
