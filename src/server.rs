//! Optional HTTP endpoint exposing the merged node status
//!
//! `GET /healthz` answers `ok` while the process is alive and
//! `GET /conditions` returns the merged conditions as JSON.

use crate::detector::NodeStatusHandle;
use crate::error::ServerError;
use crate::types::Condition;
use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use log::{debug, error, info};
use std::net::{SocketAddr, TcpListener};
use std::thread::{self, JoinHandle};
use tokio::sync::oneshot;

/// Default port of the status endpoint; zero disables it
pub const DEFAULT_STATUS_PORT: u16 = 20256;

fn router(status: NodeStatusHandle) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/conditions", get(conditions))
        .with_state(status)
}

async fn healthz() -> &'static str {
    "ok"
}

async fn conditions(State(status): State<NodeStatusHandle>) -> Json<Vec<Condition>> {
    Json(status.conditions())
}

/// Status endpoint served from its own thread
///
/// The listener is bound in `start`, so an address in use is reported to the
/// caller instead of the serving thread.
pub struct StatusServer {
    address: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    worker: Option<JoinHandle<()>>,
}

impl StatusServer {
    pub fn start(address: SocketAddr, status: NodeStatusHandle) -> Result<Self, ServerError> {
        let listener =
            TcpListener::bind(address).map_err(|e| ServerError::Bind(address, e))?;
        listener.set_nonblocking(true)?;
        let address = listener.local_addr()?;

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        let (shutdown, shutdown_signal) = oneshot::channel::<()>();

        let worker = thread::Builder::new()
            .name("status-server".to_string())
            .spawn(move || {
                let served = runtime.block_on(async move {
                    let listener = tokio::net::TcpListener::from_std(listener)?;
                    axum::serve(listener, router(status))
                        .with_graceful_shutdown(async {
                            let _ = shutdown_signal.await;
                        })
                        .await
                });
                if let Err(e) = served {
                    error!("Status server error: {}", e);
                }
                debug!("Status server thread finished");
            })?;

        info!("Serving node status on http://{}", address);
        Ok(Self {
            address,
            shutdown: Some(shutdown),
            worker: Some(worker),
        })
    }

    /// Address actually bound, useful when port 0 was requested
    pub fn local_addr(&self) -> SocketAddr {
        self.address
    }

    pub fn stop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                error!("Status server thread panicked");
            }
            info!("Status server stopped");
        }
    }
}

impl Drop for StatusServer {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ConditionStatus;
    use chrono::{TimeZone, Utc};

    fn get_body(url: String) -> (u16, String) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        runtime.block_on(async {
            let response = reqwest::get(url).await.unwrap();
            let status = response.status().as_u16();
            (status, response.text().await.unwrap())
        })
    }

    #[test]
    fn test_serves_health_and_conditions() {
        let status = NodeStatusHandle::new();
        status.apply(
            0,
            "kernel-monitor",
            &[Condition {
                condition_type: "KernelDeadlock".to_string(),
                status: ConditionStatus::True,
                transition: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
                reason: "DockerHung".to_string(),
                message: "task docker blocked".to_string(),
            }],
        );

        let mut server =
            StatusServer::start("127.0.0.1:0".parse().unwrap(), status.clone()).unwrap();
        let base = format!("http://{}", server.local_addr());

        assert_eq!(get_body(format!("{}/healthz", base)), (200, "ok".to_string()));

        let (code, body) = get_body(format!("{}/conditions", base));
        assert_eq!(code, 200);
        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json[0]["type"], "KernelDeadlock");
        assert_eq!(json[0]["status"], "True");
        assert_eq!(json[0]["reason"], "DockerHung");

        server.stop();
        server.stop();
    }

    #[test]
    fn test_address_in_use_is_reported() {
        let taken = TcpListener::bind("127.0.0.1:0").unwrap();
        let result = StatusServer::start(taken.local_addr().unwrap(), NodeStatusHandle::new());
        assert!(matches!(result, Err(ServerError::Bind(_, _))));
    }
}
