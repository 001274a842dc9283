use std::{
    collections::HashMap,
    net::SocketAddr,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, OnceLock,
    },
    time::{Duration, Instant},
};

use anyhow::Context;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use chrono::{DateTime, Datelike, Utc};
use chrono_tz::Tz;
use rumqttc::{AsyncClient, Event, Incoming, MqttOptions, QoS};
use serde::{Deserialize, Serialize};
use tokio::{
    net::TcpListener,
    sync::{watch, Mutex},
    task::JoinHandle,
    time::MissedTickBehavior,
};
use tracing::{info, warn};

use heater_common::{
    AutoControlEngine, ControllerStatus, Mode, RuntimeConfig, Schedule, ScheduleDraft,
    ScheduleError, ScheduleId, ScheduleStore, Weekday, TOPIC_CMD_AUTO, TOPIC_CMD_MODE,
    TOPIC_CMD_TARGET, TOPIC_CONTROLLER_SCHEDULES_STATE, TOPIC_CONTROLLER_STATE,
};

use crate::{control_loop::ControlLoop, device::HttpHeaterDevice, persist::AppStore};

#[derive(Clone)]
struct AppState {
    control: ControlLoop<HttpHeaterDevice>,
    timezone: Arc<Mutex<String>>,
    time_synced: Arc<AtomicBool>,
    mqtt: AsyncClient,
    store: AppStore,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

#[derive(Debug, Deserialize)]
struct TimezoneUpdate {
    timezone: String,
}

#[derive(Debug, Serialize)]
struct TimeStatus {
    #[serde(rename = "timeSynced")]
    time_synced: bool,
    timezone: String,
    #[serde(rename = "nowEpoch")]
    now_epoch: i64,
}

const MAX_MQTT_PAYLOAD_BYTES: usize = 512;

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let store = AppStore::from_env();
    let mut runtime = store.load_runtime_config().await.unwrap_or_else(|err| {
        warn!("failed to load runtime config from store: {err:#}");
        RuntimeConfig::default()
    });
    apply_env_overrides(&mut runtime);
    runtime.control.sanitize();
    runtime.settings.sanitize();

    let saved = store.load_schedules().await.unwrap_or_else(|err| {
        warn!("failed to load schedules from store: {err:#}");
        Vec::new()
    });
    let (schedules, rejected) = ScheduleStore::restore(saved, today_in(&runtime.timezone));
    for (schedule, err) in rejected {
        warn!(schedule = %schedule.id, error = %err, "dropping stored schedule");
    }
    info!(count = schedules.len(), "schedules loaded");

    let device = HttpHeaterDevice::new(&runtime.device, runtime.control.status_timeout_ms)?;
    info!(url = %device.base_url(), "heater device configured");

    let engine = AutoControlEngine::new(runtime.control.clone(), runtime.settings.clone());
    let control = ControlLoop::new(device, engine, schedules);

    let mut mqtt_options = MqttOptions::new(
        "heater-controller",
        runtime.network.mqtt_host.clone(),
        runtime.network.mqtt_port,
    );
    if !runtime.network.mqtt_user.is_empty() {
        mqtt_options.set_credentials(
            runtime.network.mqtt_user.clone(),
            runtime.network.mqtt_pass.clone(),
        );
    }
    let (mqtt, eventloop) = AsyncClient::new(mqtt_options, 64);

    let app_state = AppState {
        control,
        timezone: Arc::new(Mutex::new(runtime.timezone.clone())),
        time_synced: Arc::new(AtomicBool::new(false)),
        mqtt,
        store,
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    subscribe_topics(&app_state.mqtt).await?;
    spawn_mqtt_loop(app_state.clone(), eventloop);
    let control_task =
        spawn_control_loop(app_state.clone(), runtime.control.poll_interval_ms, shutdown_rx);
    spawn_settings_persist_loop(app_state.clone());
    spawn_state_publish_loop(
        app_state.clone(),
        runtime.control.state_publish_interval_ms,
    );

    let port = std::env::var("CONTROLLER_HTTP_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(8080);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind controller server at {addr}"))?;

    info!("controller listening on http://{addr}");
    axum::serve(listener, router(app_state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("controller server failed")?;

    let _ = shutdown_tx.send(true);
    if let Err(err) = control_task.await {
        warn!("control loop task ended abnormally: {err}");
    }
    Ok(())
}

fn router(app_state: AppState) -> Router {
    Router::new()
        .route("/api/status", get(handle_get_status))
        .route("/api/target", post(handle_set_target))
        .route("/api/auto", post(handle_set_auto))
        .route("/api/mode", post(handle_set_mode))
        .route(
            "/api/schedules",
            get(handle_get_schedules)
                .post(handle_add_schedule)
                .put(handle_put_schedules),
        )
        .route("/api/schedules/save", post(handle_save_schedules))
        .route(
            "/api/schedules/{id}",
            put(handle_edit_schedule).delete(handle_delete_schedule),
        )
        .route("/api/time", get(handle_get_time))
        .route("/api/timezone", put(handle_put_timezone))
        .with_state(app_state)
}

fn apply_env_overrides(runtime: &mut RuntimeConfig) {
    if let Ok(url) = std::env::var("HEATER_DEVICE_URL") {
        runtime.device.base_url = url;
    }
    if let Ok(host) = std::env::var("MQTT_HOST") {
        runtime.network.mqtt_host = host;
    }
    if let Some(port) = std::env::var("MQTT_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
    {
        runtime.network.mqtt_port = port;
    }
    if let Ok(user) = std::env::var("MQTT_USER") {
        runtime.network.mqtt_user = user;
    }
    if let Ok(pass) = std::env::var("MQTT_PASS") {
        runtime.network.mqtt_pass = pass;
    }
}

async fn subscribe_topics(mqtt: &AsyncClient) -> anyhow::Result<()> {
    for topic in [TOPIC_CMD_TARGET, TOPIC_CMD_AUTO, TOPIC_CMD_MODE] {
        mqtt.subscribe(topic, QoS::AtMostOnce)
            .await
            .with_context(|| format!("failed to subscribe to {topic}"))?;
    }
    Ok(())
}

fn spawn_mqtt_loop(app_state: AppState, mut eventloop: rumqttc::EventLoop) {
    tokio::spawn(async move {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Incoming::Publish(message))) => {
                    if let Err(err) =
                        handle_mqtt_message(&app_state, &message.topic, &message.payload).await
                    {
                        warn!("mqtt message handling error: {err:#}");
                    }
                }
                Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                    info!("mqtt connected");
                }
                Ok(_) => {}
                Err(err) => {
                    warn!("mqtt poll error: {err}");
                    tokio::time::sleep(Duration::from_secs(2)).await;
                }
            }
        }
    });
}

fn spawn_control_loop(
    app_state: AppState,
    poll_interval_ms: u64,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let control = &app_state.control;
        let mut poll = tokio::time::interval(Duration::from_millis(poll_interval_ms));
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(poll_interval_ms, "control loop started");

        loop {
            let until_due = control
                .next_deadline_ms()
                .await
                .map(|deadline| Duration::from_millis(deadline.saturating_sub(monotonic_ms())));

            tokio::select! {
                _ = poll.tick() => {
                    let timezone = app_state.timezone.lock().await.clone();
                    let now_local = now_in_timezone(&timezone);
                    app_state
                        .time_synced
                        .store(now_local.is_some(), Ordering::Relaxed);

                    control.apply_schedules(now_local, monotonic_ms()).await;
                    control.poll_once(monotonic_ms()).await;
                }
                _ = sleep_for(until_due) => {
                    control.fire_due(monotonic_ms()).await;
                }
                _ = control.woken() => {}
                _ = shutdown.changed() => break,
            }
        }

        control.shutdown().await;
        info!("control loop stopped");
    })
}

async fn sleep_for(delay: Option<Duration>) {
    match delay {
        Some(delay) => tokio::time::sleep(delay).await,
        None => std::future::pending().await,
    }
}

fn spawn_settings_persist_loop(app_state: AppState) {
    tokio::spawn(async move {
        loop {
            app_state.control.settings_changed().await;
            if let Err(err) = persist_runtime_from_state(&app_state).await {
                warn!("failed to persist schedule-driven settings: {err:#}");
            }
        }
    });
}

fn spawn_state_publish_loop(app_state: AppState, interval_ms: u64) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_millis(interval_ms));
        loop {
            interval.tick().await;

            let status = current_status(&app_state).await;
            match serde_json::to_vec(&status) {
                Ok(body) => {
                    if let Err(err) = app_state
                        .mqtt
                        .publish(TOPIC_CONTROLLER_STATE, QoS::AtLeastOnce, true, body)
                        .await
                    {
                        warn!("controller state publish failed: {err}");
                    }
                }
                Err(err) => warn!("controller state serialization failed: {err}"),
            }

            let schedules = app_state.control.schedules.lock().await.list().to_vec();
            match serde_json::to_vec(&schedules) {
                Ok(body) => {
                    if let Err(err) = app_state
                        .mqtt
                        .publish(TOPIC_CONTROLLER_SCHEDULES_STATE, QoS::AtLeastOnce, true, body)
                        .await
                    {
                        warn!("schedule state publish failed: {err}");
                    }
                }
                Err(err) => warn!("schedule serialization failed: {err}"),
            }
        }
    });
}

async fn handle_mqtt_message(
    app_state: &AppState,
    topic: &str,
    payload: &[u8],
) -> anyhow::Result<()> {
    if payload.len() > MAX_MQTT_PAYLOAD_BYTES {
        warn!(
            "dropping oversized MQTT payload on topic {} ({} bytes)",
            topic,
            payload.len()
        );
        return Ok(());
    }

    let message = std::str::from_utf8(payload).context("non utf8 mqtt payload")?;
    let message = message.trim();

    match topic {
        TOPIC_CMD_TARGET => match message.parse::<f32>() {
            Ok(target) if target.is_finite() => apply_target(app_state, target).await?,
            _ => warn!("ignoring target command {message:?}"),
        },
        TOPIC_CMD_AUTO => match parse_switch(message) {
            Some(enabled) => apply_auto(app_state, enabled).await?,
            None => warn!("ignoring auto command {message:?}"),
        },
        TOPIC_CMD_MODE => match message.parse::<Mode>() {
            Ok(mode) => apply_manual_mode(app_state, mode).await?,
            Err(err) => warn!("ignoring mode command: {err}"),
        },
        _ => {}
    }
    Ok(())
}

async fn apply_target(state: &AppState, target: f32) -> anyhow::Result<()> {
    let now_ms = monotonic_ms();
    let (changed, actions) = state
        .control
        .engine
        .lock()
        .await
        .set_target_temp(target, now_ms);
    state.control.execute(actions, now_ms).await;
    if changed {
        persist_runtime_from_state(state).await?;
    }
    Ok(())
}

async fn apply_auto(state: &AppState, enabled: bool) -> anyhow::Result<()> {
    let now_ms = monotonic_ms();
    let (changed, actions) = state
        .control
        .engine
        .lock()
        .await
        .set_auto_enabled(enabled, now_ms);
    state.control.execute(actions, now_ms).await;
    if changed {
        info!(enabled, "auto control toggled");
        persist_runtime_from_state(state).await?;
    }
    Ok(())
}

async fn apply_manual_mode(state: &AppState, mode: Mode) -> anyhow::Result<()> {
    let now_ms = monotonic_ms();
    let (changed, actions) = state.control.engine.lock().await.set_manual_mode(mode);
    state.control.execute(actions, now_ms).await;
    if changed {
        persist_runtime_from_state(state).await?;
    }
    Ok(())
}

async fn current_status(state: &AppState) -> ControllerStatus {
    let timezone = state.timezone.lock().await.clone();
    state
        .control
        .status(monotonic_ms(), now_in_timezone(&timezone), &timezone)
        .await
}

async fn handle_get_status(State(state): State<AppState>) -> impl IntoResponse {
    Json(current_status(&state).await)
}

async fn handle_set_target(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let Some(value) = params.get("value") else {
        return error_response(StatusCode::BAD_REQUEST, "Missing 'value' parameter");
    };
    let target = match value.parse::<f32>() {
        Ok(target) if target.is_finite() => target,
        _ => return error_response(StatusCode::BAD_REQUEST, "Invalid temperature value"),
    };

    if let Err(err) = apply_target(&state, target).await {
        warn!("failed to persist target update: {err:#}");
        return error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to persist runtime settings",
        );
    }
    Json(current_status(&state).await).into_response()
}

async fn handle_set_auto(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let Some(enabled) = params.get("value").map(String::as_str).and_then(parse_switch) else {
        return error_response(StatusCode::BAD_REQUEST, "Invalid value. Use 'on' or 'off'");
    };

    if let Err(err) = apply_auto(&state, enabled).await {
        warn!("failed to persist auto update: {err:#}");
        return error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to persist runtime settings",
        );
    }
    Json(current_status(&state).await).into_response()
}

async fn handle_set_mode(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let Some(value) = params.get("value") else {
        return error_response(StatusCode::BAD_REQUEST, "Missing 'value' parameter");
    };
    let Ok(mode) = value.parse::<Mode>() else {
        return error_response(
            StatusCode::BAD_REQUEST,
            "Invalid mode. Use 'off', 'pilot', 'min' or 'max'",
        );
    };

    if let Err(err) = apply_manual_mode(&state, mode).await {
        warn!("failed to persist mode update: {err:#}");
        return error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to persist runtime settings",
        );
    }
    Json(current_status(&state).await).into_response()
}

async fn handle_get_schedules(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.control.schedules.lock().await.list().to_vec())
}

async fn handle_add_schedule(
    State(state): State<AppState>,
    Json(draft): Json<ScheduleDraft>,
) -> Response {
    let today = today_in(&state.timezone.lock().await);
    let result = state.control.schedules.lock().await.add(draft, today).cloned();

    match result {
        Ok(schedule) => {
            info!(schedule = %schedule.id, "schedule added");
            (StatusCode::CREATED, Json(schedule)).into_response()
        }
        Err(err) => schedule_error_response(&err),
    }
}

async fn handle_edit_schedule(
    State(state): State<AppState>,
    Path(id): Path<u64>,
    Json(draft): Json<ScheduleDraft>,
) -> Response {
    let today = today_in(&state.timezone.lock().await);
    let result = state
        .control
        .schedules
        .lock()
        .await
        .replace(ScheduleId(id), draft, today)
        .cloned();

    match result {
        Ok(schedule) => {
            info!(schedule = %schedule.id, "schedule edited");
            Json(schedule).into_response()
        }
        Err(err) => schedule_error_response(&err),
    }
}

async fn handle_delete_schedule(State(state): State<AppState>, Path(id): Path<u64>) -> Response {
    let removed = state.control.schedules.lock().await.remove(ScheduleId(id));
    match removed {
        Some(schedule) => {
            info!(schedule = %schedule.id, "schedule removed");
            StatusCode::NO_CONTENT.into_response()
        }
        None => schedule_error_response(&ScheduleError::NotFound(ScheduleId(id))),
    }
}

// Nothing changes unless every entry is accepted.
async fn handle_put_schedules(
    State(state): State<AppState>,
    Json(schedules): Json<Vec<Schedule>>,
) -> Response {
    let today = today_in(&state.timezone.lock().await);
    let (replacement, rejected) = ScheduleStore::restore(schedules, today);
    if let Some((_, err)) = rejected.first() {
        return schedule_error_response(err);
    }

    *state.control.schedules.lock().await = replacement;
    handle_save_schedules(State(state)).await
}

async fn handle_save_schedules(State(state): State<AppState>) -> Response {
    let schedules = state.control.schedules.lock().await.list().to_vec();
    if let Err(err) = state.store.save_schedules(&schedules).await {
        warn!("failed to persist schedules: {err:#}");
        return error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to persist schedules");
    }
    info!(count = schedules.len(), "schedules saved");
    Json(schedules).into_response()
}

async fn handle_get_time(State(state): State<AppState>) -> impl IntoResponse {
    let timezone = state.timezone.lock().await.clone();
    Json(TimeStatus {
        time_synced: state.time_synced.load(Ordering::Relaxed),
        timezone,
        now_epoch: Utc::now().timestamp(),
    })
}

async fn handle_put_timezone(
    State(state): State<AppState>,
    Json(update): Json<TimezoneUpdate>,
) -> Response {
    if update.timezone.parse::<Tz>().is_err() {
        return error_response(StatusCode::BAD_REQUEST, "Invalid timezone value");
    }

    {
        let mut timezone = state.timezone.lock().await;
        *timezone = update.timezone;
    }

    if let Err(err) = persist_runtime_from_state(&state).await {
        warn!("failed to persist timezone update: {err:#}");
        return error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to persist runtime settings",
        );
    }
    handle_get_time(State(state)).await.into_response()
}

async fn persist_runtime_from_state(state: &AppState) -> anyhow::Result<()> {
    let settings = state.control.engine.lock().await.settings().clone();
    let timezone = state.timezone.lock().await.clone();

    let mut runtime = state.store.load_runtime_config().await?;
    runtime.settings = settings;
    runtime.timezone = timezone;
    state.store.save_runtime_config(&runtime).await
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!("failed to listen for ctrl-c: {err}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                warn!("failed to listen for SIGTERM: {err}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("shutdown signal received");
}

fn parse_switch(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "on" | "true" | "1" => Some(true),
        "off" | "false" | "0" => Some(false),
        _ => None,
    }
}

fn schedule_error_response(err: &ScheduleError) -> Response {
    let status = match err {
        ScheduleError::Conflict { .. }
        | ScheduleError::DuplicateId(_)
        | ScheduleError::IdsExhausted => StatusCode::CONFLICT,
        ScheduleError::NotFound(_) => StatusCode::NOT_FOUND,
        _ => StatusCode::BAD_REQUEST,
    };
    error_response(status, &err.to_string())
}

fn today_in(timezone: &str) -> Weekday {
    let weekday = match now_in_timezone(timezone) {
        Some(now) => now.weekday(),
        None => Utc::now().weekday(),
    };
    Weekday::from_chrono(weekday)
}

fn now_in_timezone(timezone: &str) -> Option<DateTime<Tz>> {
    let tz: Tz = timezone.parse().ok()?;
    Some(Utc::now().with_timezone(&tz))
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

fn monotonic_ms() -> u64 {
    static START: OnceLock<Instant> = OnceLock::new();
    START
        .get_or_init(Instant::now)
        .elapsed()
        .as_millis()
        .try_into()
        .unwrap_or(u64::MAX)
}
