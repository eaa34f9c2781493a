use super::{ComponentState, FfwardenOrchestrator};
use crate::error::{FfwardenError, Result};
use crate::health::ShutdownReason;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::info;

impl FfwardenOrchestrator {
    /// Run the health monitor until a verdict or a termination signal
    pub async fn run(&mut self) -> Result<ShutdownReason> {
        info!("ffwarden is running");

        let monitor = self.monitor.take().ok_or_else(|| FfwardenError::System {
            message: "Health monitor already taken".to_string(),
        })?;

        let (signal_sender, mut signal_receiver) = oneshot::channel();
        self.setup_signal_handlers(signal_sender)?;

        self.set_component_state("monitor", ComponentState::Running)
            .await;
        let verdict = tokio::spawn(monitor.run())
            .await
            .map_err(|e| FfwardenError::system(format!("Health monitor task failed: {}", e)))?;
        self.set_component_state("monitor", ComponentState::Stopped)
            .await;

        let reason = match verdict {
            Some(reason) => reason,
            None => signal_receiver
                .try_recv()
                .unwrap_or_else(|_| ShutdownReason::Signal("cancelled".to_string())),
        };

        info!("Shutdown initiated: {}", reason);
        Ok(reason)
    }

    /// SIGINT and SIGTERM record the reason and cancel the monitor
    fn setup_signal_handlers(&self, sender: oneshot::Sender<ShutdownReason>) -> Result<()> {
        let sender = Arc::new(Mutex::new(Some(sender)));

        let mut terminate = signal(SignalKind::terminate())?;
        let mut interrupt = signal(SignalKind::interrupt())?;

        spawn_signal_task(
            "SIGTERM",
            async move { terminate.recv().await.is_some() },
            Arc::clone(&sender),
            self.cancellation_token.clone(),
        );
        spawn_signal_task(
            "SIGINT",
            async move { interrupt.recv().await.is_some() },
            sender,
            self.cancellation_token.clone(),
        );
        Ok(())
    }
}

fn spawn_signal_task<F>(
    name: &'static str,
    received: F,
    sender: Arc<Mutex<Option<oneshot::Sender<ShutdownReason>>>>,
    cancellation_token: CancellationToken,
) where
    F: std::future::Future<Output = bool> + Send + 'static,
{
    tokio::spawn(async move {
        tokio::select! {
            _ = cancellation_token.cancelled() => {}
            got = received => {
                if got {
                    info!("Received {} signal", name);
                    if let Some(sender) = sender.lock().take() {
                        let _ = sender.send(ShutdownReason::Signal(name.to_string()));
                    }
                    cancellation_token.cancel();
                }
            }
        }
    });
}
