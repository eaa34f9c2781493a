use crate::{
    config::QueryConfig,
    error::{FfwardenError, Result},
    health::MonitorPhase,
    process::ProcessSupervisor,
    status::StatusFiles,
};
use axum::{routing::get, Router};
use parking_lot::RwLock;
use std::io;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use super::handlers::{
    cmd_handler, container_id_handler, ffmpeg_pid_handler, health_handler,
    last_progress_handler, last_stdout_handler, pid_handler, start_time_handler,
};

/// Shared state for the Axum server
#[derive(Clone)]
pub struct QueryState {
    pub(crate) supervisor: Arc<ProcessSupervisor>,
    pub(crate) status: Arc<StatusFiles>,
    pub(crate) phase: Arc<RwLock<MonitorPhase>>,
    pub(crate) default_count: i64,
}

/// Read-only HTTP interface over the telemetry buffers
pub struct QueryServer {
    pub(crate) config: QueryConfig,
    pub(crate) state: QueryState,
}

impl QueryServer {
    pub fn router(&self) -> Router {
        Router::new()
            .route("/last_stdout", get(last_stdout_handler))
            .route("/last_progress", get(last_progress_handler))
            .route("/start_time", get(start_time_handler))
            .route("/cmd", get(cmd_handler))
            .route("/get_container_id", get(container_id_handler))
            .route("/get_pid", get(pid_handler))
            .route("/get_ffmpeg_pid", get(ffmpeg_pid_handler))
            .route("/health", get(health_handler))
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone())
    }

    /// Bind the configured port, moving to the next one while it is busy
    pub async fn bind(&self) -> Result<(TcpListener, u16)> {
        let host = self.config.host.as_str();
        let mut port = self.config.port;

        for _ in 0..=self.config.port_search_limit {
            match TcpListener::bind((host, port)).await {
                Ok(listener) => {
                    let bound = listener.local_addr()?.port();
                    info!("HTTP server will be available on {}:{}", host, bound);
                    return Ok((listener, bound));
                }
                Err(e) if e.kind() == io::ErrorKind::AddrInUse => {
                    warn!("Port {} already in use, trying next", port);
                    port = port.checked_add(1).ok_or_else(|| FfwardenError::Query {
                        message: "Port range exhausted".to_string(),
                    })?;
                }
                Err(e) => {
                    return Err(FfwardenError::Query {
                        message: format!("Failed to bind {}:{}: {}", host, port, e),
                    })
                }
            }
        }

        Err(FfwardenError::Query {
            message: format!(
                "No free port found after {} attempts starting at {}",
                self.config.port_search_limit, self.config.port
            ),
        })
    }

    /// Serve until the token is cancelled
    pub async fn serve(
        &self,
        listener: TcpListener,
        cancellation_token: CancellationToken,
    ) -> Result<()> {
        let app = self.router();

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                cancellation_token.cancelled().await;
            })
            .await
            .map_err(|e| FfwardenError::Query {
                message: format!("Server error: {}", e),
            })?;

        info!("HTTP server stopped");
        Ok(())
    }
}

#[derive(Default)]
pub struct QueryServerBuilder {
    config: Option<QueryConfig>,
    supervisor: Option<Arc<ProcessSupervisor>>,
    status: Option<Arc<StatusFiles>>,
    phase: Option<Arc<RwLock<MonitorPhase>>>,
}

impl QueryServerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config(mut self, config: QueryConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn supervisor(mut self, supervisor: Arc<ProcessSupervisor>) -> Self {
        self.supervisor = Some(supervisor);
        self
    }

    pub fn status(mut self, status: Arc<StatusFiles>) -> Self {
        self.status = Some(status);
        self
    }

    /// Monitor phase reported by `/health`; defaults to warming up
    pub fn phase(mut self, phase: Arc<RwLock<MonitorPhase>>) -> Self {
        self.phase = Some(phase);
        self
    }

    pub fn build(self) -> Result<QueryServer> {
        let config = self.config.ok_or_else(|| missing("Query configuration"))?;
        let supervisor = self.supervisor.ok_or_else(|| missing("Process supervisor"))?;
        let status = self.status.ok_or_else(|| missing("Status files"))?;
        let phase = self
            .phase
            .unwrap_or_else(|| Arc::new(RwLock::new(MonitorPhase::WarmingUp)));
        let default_count = config.default_count;

        Ok(QueryServer {
            config,
            state: QueryState {
                supervisor,
                status,
                phase,
                default_count,
            },
        })
    }
}

fn missing(what: &str) -> FfwardenError {
    FfwardenError::Query {
        message: format!("{} is required", what),
    }
}
