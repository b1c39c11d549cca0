//! Health check HTTP server
//!
//! Exposes the bus connection state and process metrics to whatever
//! supervises the device (systemd watchdog scripts, a fleet dashboard).

use crate::connection::ConnectionState;
use crate::gpio::{GpioBackend, PinStatus};
use crate::observability::metrics::{current_timestamp, metrics};
use serde::Serialize;
use std::collections::BTreeMap;
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::watch;
use warp::http::StatusCode;
use warp::Filter;

/// HTTP health check server
pub struct HealthServer {
    client_id: String,
    port: u16,
    /// `None` when the bus integration is disabled
    connection_state: Option<watch::Receiver<ConnectionState>>,
    gpio: Option<GpioReport>,
}

struct GpioReport {
    backend: GpioBackend,
    labels: BTreeMap<u32, String>,
}

impl HealthServer {
    pub fn new(
        client_id: impl Into<String>,
        port: u16,
        connection_state: Option<watch::Receiver<ConnectionState>>,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            port,
            connection_state,
            gpio: None,
        }
    }

    /// Serve the pin table on `/gpio`
    pub fn with_gpio(mut self, backend: GpioBackend, labels: BTreeMap<u32, String>) -> Self {
        self.gpio = Some(GpioReport { backend, labels });
        self
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Current bus state, `None` when the bus is disabled
    fn bus_state(&self) -> Option<ConnectionState> {
        self.connection_state.as_ref().map(|rx| *rx.borrow())
    }

    /// Ready means commands can be answered: connected, or running without a bus
    fn is_ready(&self) -> bool {
        self.bus_state()
            .map_or(true, |state| state == ConnectionState::Connected)
    }

    /// Pin status rows; empty when no backend is attached
    async fn gpio_status(&self) -> Vec<PinStatus> {
        match &self.gpio {
            Some(report) => report.backend.status(&report.labels).await,
            None => Vec::new(),
        }
    }

    fn health_status(&self) -> HealthStatus {
        let now = current_timestamp();
        let mut checks = BTreeMap::new();

        let bus_check = match self.bus_state() {
            Some(ConnectionState::Connected) => HealthCheck {
                status: "healthy".to_string(),
                message: Some("Bus connection established".to_string()),
                last_check: now,
            },
            Some(state) => HealthCheck {
                status: "unhealthy".to_string(),
                message: Some(format!("Bus connection is {state}")),
                last_check: now,
            },
            None => HealthCheck {
                status: "disabled".to_string(),
                message: Some("Bus integration disabled".to_string()),
                last_check: now,
            },
        };
        checks.insert("bus".to_string(), bus_check);

        let status = if self.is_ready() { "healthy" } else { "degraded" };

        HealthStatus {
            status: status.to_string(),
            timestamp: now,
            client_id: self.client_id.clone(),
            connection_state: self
                .bus_state()
                .map_or_else(|| "disabled".to_string(), |state| state.to_string()),
            uptime_seconds: metrics().get_metrics().uptime_seconds,
            checks,
        }
    }

    /// All routes served by [`HealthServer::start`]
    pub fn routes(
        self: Arc<Self>,
    ) -> impl Filter<Extract = (impl warp::Reply,), Error = warp::Rejection> + Clone {
        let health_server = self.clone();
        let ready_server = self.clone();
        let gpio_server = self;

        // GET /health - connection status with per-check detail
        let health_route = warp::path("health")
            .and(warp::path::end())
            .and(warp::get())
            .and_then(move || {
                let server = health_server.clone();
                async move {
                    let status = server.health_status();
                    let code = if status.status == "healthy" {
                        StatusCode::OK
                    } else {
                        StatusCode::SERVICE_UNAVAILABLE
                    };
                    Ok::<_, Infallible>(warp::reply::with_status(warp::reply::json(&status), code))
                }
            });

        // GET /ready
        let ready_route = warp::path("ready")
            .and(warp::path::end())
            .and(warp::get())
            .and_then(move || {
                let server = ready_server.clone();
                async move {
                    let ready = server.is_ready();
                    let response = ReadinessResponse {
                        ready,
                        timestamp: current_timestamp(),
                    };
                    let code = if ready {
                        StatusCode::OK
                    } else {
                        StatusCode::SERVICE_UNAVAILABLE
                    };
                    Ok::<_, Infallible>(warp::reply::with_status(
                        warp::reply::json(&response),
                        code,
                    ))
                }
            });

        // GET /live
        let live_route = warp::path("live")
            .and(warp::path::end())
            .and(warp::get())
            .map(|| {
                warp::reply::json(&LivenessResponse {
                    alive: true,
                    timestamp: current_timestamp(),
                })
            });

        // GET /metrics
        let metrics_route = warp::path("metrics")
            .and(warp::path::end())
            .and(warp::get())
            .map(|| warp::reply::json(&metrics().get_metrics()));

        // GET /gpio - label, mode and level of every configured pin
        let gpio_route = warp::path("gpio")
            .and(warp::path::end())
            .and(warp::get())
            .and_then(move || {
                let server = gpio_server.clone();
                async move {
                    let report = server.gpio_status().await;
                    Ok::<_, Infallible>(warp::reply::json(&report))
                }
            });

        health_route
            .or(ready_route)
            .or(live_route)
            .or(metrics_route)
            .or(gpio_route)
    }

    /// Serve until the process exits
    pub async fn start(self: Arc<Self>) {
        let port = self.port;
        tracing::info!(port, "Starting health server");
        warp::serve(self.routes()).run(([0, 0, 0, 0], port)).await;
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthCheck {
    pub status: String,
    pub message: Option<String>,
    pub last_check: u64,
}

#[derive(Debug, Serialize)]
struct HealthStatus {
    status: String,
    timestamp: u64,
    client_id: String,
    connection_state: String,
    uptime_seconds: u64,
    checks: BTreeMap<String, HealthCheck>,
}

#[derive(Debug, Serialize)]
struct ReadinessResponse {
    ready: bool,
    timestamp: u64,
}

#[derive(Debug, Serialize)]
struct LivenessResponse {
    alive: bool,
    timestamp: u64,
}
