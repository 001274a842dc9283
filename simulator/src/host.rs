use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Context;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::{net::TcpListener, sync::Mutex};
use tracing::{debug, info};

use heater_common::{ModeCommand, SimulatedHeater};

const TICK_MS: u64 = 1_000;

type SharedHeater = Arc<Mutex<SimulatedHeater>>;

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

#[derive(Debug, Deserialize)]
struct FaultUpdate {
    #[serde(rename = "failStatus", default)]
    fail_status: bool,
    #[serde(rename = "rejectCommands", default)]
    reject_commands: bool,
}

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let heater: SharedHeater = Arc::new(Mutex::new(SimulatedHeater::default()));
    spawn_drift_loop(heater.clone());

    let app = Router::new()
        .route("/status", get(handle_get_status))
        .route("/mode", post(handle_set_mode))
        .route("/faults", post(handle_set_faults))
        .with_state(heater);

    let port = std::env::var("SIMULATOR_HTTP_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(8090);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind simulator at {addr}"))?;

    info!("heater simulator listening on http://{addr}");
    axum::serve(listener, app)
        .await
        .context("simulator server failed")?;
    Ok(())
}

fn spawn_drift_loop(heater: SharedHeater) {
    tokio::spawn(async move {
        let mut tick: u64 = 0;
        let mut interval = tokio::time::interval(Duration::from_millis(TICK_MS));

        loop {
            interval.tick().await;
            tick = tick.saturating_add(1);

            let mut heater = heater.lock().await;
            heater.advance(TICK_MS as f32 / 1_000.0, wobble(tick));
            heater.set_wifi_strength(wifi_bars(tick));
            debug!(
                mode = %heater.mode(),
                temperature_c = heater.temperature_c(),
                "simulated heater tick"
            );
        }
    });
}

fn wobble(tick: u64) -> f32 {
    ((tick % 8) as f32 - 3.5) * 0.01
}

fn wifi_bars(tick: u64) -> u8 {
    4 - ((tick / 60) % 4) as u8
}

async fn handle_get_status(State(heater): State<SharedHeater>) -> Response {
    let status = heater.lock().await.status();
    match status {
        Some(mut status) => {
            status.timestamp = Some(Utc::now());
            Json(status).into_response()
        }
        None => error_response(StatusCode::SERVICE_UNAVAILABLE, "Status unavailable"),
    }
}

async fn handle_set_mode(
    State(heater): State<SharedHeater>,
    Json(command): Json<ModeCommand>,
) -> Response {
    let mut heater = heater.lock().await;
    if !heater.apply_mode(command.mode) {
        return error_response(StatusCode::SERVICE_UNAVAILABLE, "Command rejected");
    }

    info!(mode = %command.mode, "simulated heater mode set");
    Json(command).into_response()
}

async fn handle_set_faults(
    State(heater): State<SharedHeater>,
    Json(update): Json<FaultUpdate>,
) -> impl IntoResponse {
    let mut heater = heater.lock().await;
    heater.set_fail_status(update.fail_status);
    heater.set_reject_commands(update.reject_commands);
    info!(
        fail_status = update.fail_status,
        reject_commands = update.reject_commands,
        "simulated faults updated"
    );
    StatusCode::NO_CONTENT
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (
        status,
        Json(ErrorBody {
            error: message.to_string(),
        }),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wobble_averages_out_over_a_cycle() {
        let total: f32 = (1..=8).map(wobble).sum();
        assert!(total.abs() < 1e-6);
    }

    #[test]
    fn wifi_bars_stay_in_range() {
        assert!((0..1_000).map(wifi_bars).all(|bars| (1..=4).contains(&bars)));
    }
}
