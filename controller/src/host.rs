use std::{
    collections::HashMap,
    io::ErrorKind,
    net::SocketAddr,
    path::{Path as FsPath, PathBuf},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, OnceLock,
    },
    time::{Duration, Instant, SystemTime, UNIX_EPOCH},
};

use anyhow::Context;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Form, Path, Query, State,
    },
    http::{header, StatusCode},
    middleware,
    response::{Html, IntoResponse, Redirect},
    routing::{get, post, put},
    Json, Router,
};
use chrono::{Offset, Utc};
use chrono_tz::Tz;
use garden_common::{
    hal::Provisioner, ClientSnapshot, ControllerEngine, DayOfWeek, DeviceStore, PressAction,
    RuntimeConfig, Schedule, ScheduleWindow, TickInputs, TickOutcome, WeekdayMask,
};
use serde::{Deserialize, Serialize};
use tokio::{net::TcpListener, sync::Mutex, time::MissedTickBehavior};
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use crate::{
    auth::{require_session, SessionAuth},
    provisioning::HostProvisioner,
    sim::{SimBoard, SimButton, SimTouchPanel},
    sync::{parse_toggle, Broadcaster},
};

const DASHBOARD_HTML: &str = include_str!("../web/index.html");
const LOGIN_HTML: &str = include_str!("../web/login.html");
const APP_JS: &str = include_str!("../web/app.js");
const STYLE_CSS: &str = include_str!("../web/style.css");
const MAX_CLIENT_MESSAGE_BYTES: usize = 64;

#[derive(Clone)]
pub struct AppState {
    engine: Arc<Mutex<ControllerEngine>>,
    broadcaster: Broadcaster,
    timezone: Arc<Mutex<String>>,
    time_synced: Arc<AtomicBool>,
    pub auth: SessionAuth,
    button: SimButton,
    touch: SimTouchPanel,
    store: AppStore,
}

#[derive(Clone)]
struct AppStore {
    runtime_path: Arc<PathBuf>,
    lock: Arc<Mutex<()>>,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

#[derive(Debug, Serialize)]
struct StatusView {
    #[serde(flatten)]
    snapshot: ClientSnapshot,
    #[serde(rename = "deviceNames")]
    device_names: Vec<String>,
    #[serde(rename = "resetPhase")]
    reset_phase: &'static str,
    clients: usize,
    #[serde(rename = "scheduleEnabled")]
    schedule_enabled: bool,
    #[serde(rename = "timeSynced")]
    time_synced: bool,
}

#[derive(Debug, Serialize)]
struct ScheduleView {
    schedule: Schedule,
    active: Option<bool>,
    #[serde(rename = "nextTransitionEpoch")]
    next_transition_epoch: Option<i64>,
    #[serde(rename = "timeSynced")]
    time_synced: bool,
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

#[derive(Debug, Deserialize)]
struct LoginForm {
    username: String,
    password: String,
}

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let store = AppStore::new();
    let mut runtime = store.load_runtime_config().await.unwrap_or_else(|err| {
        warn!("failed to load runtime config from store: {err:#}");
        RuntimeConfig::default()
    });
    runtime.sanitize();

    let button = SimButton::default();
    let touch = SimTouchPanel::new(runtime.touch_inputs.len());
    let (board, devices) = SimBoard::new(&runtime, button.clone(), touch.clone());
    let engine = ControllerEngine::new(
        runtime.controller.clone(),
        DeviceStore::new(devices),
        runtime.touch_inputs.iter().map(|touch| touch.device).collect(),
        runtime.reset_button.active_low,
        runtime.schedule.clone(),
    );
    let provisioner =
        HostProvisioner::new(runtime.network.clone(), store.runtime_path().to_path_buf());

    let boot_nonce = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_nanos())
        .unwrap_or_default();
    let app_state = AppState::new(
        engine,
        runtime.timezone.clone(),
        store,
        SessionAuth::new(runtime.login.clone(), boot_nonce),
        button,
        touch,
    );

    spawn_control_loop(app_state.clone(), board, provisioner);
    spawn_heartbeat_loop(
        app_state.clone(),
        Duration::from_millis(runtime.controller.heartbeat_interval_ms),
    );

    let app = build_router(app_state);

    let port = std::env::var("GARDEN_HTTP_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(runtime.network.http_port);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind controller server at {addr}"))?;

    info!(
        devices = runtime.devices.len(),
        touch_inputs = runtime.touch_inputs.len(),
        "controller listening on http://{addr}"
    );
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("controller stopped");
    Ok(())
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
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                term.recv().await;
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

impl AppState {
    fn new(
        engine: ControllerEngine,
        timezone: String,
        store: AppStore,
        auth: SessionAuth,
        button: SimButton,
        touch: SimTouchPanel,
    ) -> Self {
        Self {
            engine: Arc::new(Mutex::new(engine)),
            broadcaster: Broadcaster::new(),
            timezone: Arc::new(Mutex::new(timezone)),
            time_synced: Arc::new(AtomicBool::new(false)),
            auth,
            button,
            touch,
            store,
        }
    }
}

fn build_router(app_state: AppState) -> Router {
    Router::new()
        .route("/", get(handle_dashboard))
        .route("/ws", get(handle_ws))
        .route("/api/status", get(handle_get_status))
        .route("/api/devices/{index}/toggle", post(handle_toggle_device))
        .route(
            "/api/schedule",
            get(handle_get_schedule).post(handle_post_schedule),
        )
        .route("/api/time", get(handle_get_time))
        .route("/api/timezone", put(handle_put_timezone))
        .route("/api/sim/reset-button", post(handle_sim_reset_button))
        .route("/api/sim/touch/{index}", post(handle_sim_touch))
        .route_layer(middleware::from_fn_with_state(
            app_state.clone(),
            require_session,
        ))
        .route("/login", get(handle_login_page).post(handle_login))
        .route("/logout", get(handle_logout))
        .route("/app.js", get(handle_app_js))
        .route("/style.css", get(handle_style_css))
        .layer(TraceLayer::new_for_http())
        .with_state(app_state)
}

fn spawn_control_loop(
    app_state: AppState,
    mut board: SimBoard,
    mut provisioner: impl Provisioner + 'static,
) {
    tokio::spawn(async move {
        let period = app_state.engine.lock().await.config.loop_interval_ms;
        let mut interval = tokio::time::interval(Duration::from_millis(period));
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            interval.tick().await;
            run_tick(&app_state, &mut board, &mut provisioner, monotonic_ms()).await;
        }
    });
}

/// One control-loop iteration: sample the board, advance the engine, publish
/// a snapshot if any device changed and hand long-press actions to the
/// provisioner.
async fn run_tick(
    app_state: &AppState,
    board: &mut SimBoard,
    provisioner: &mut impl Provisioner,
    now_ms: u64,
) -> TickOutcome {
    let timezone = { app_state.timezone.lock().await.clone() };
    let wall_clock = now_in_timezone(&timezone);
    app_state
        .time_synced
        .store(wall_clock.is_some(), Ordering::Relaxed);

    let sensors_due = app_state.engine.lock().await.sensors_due(now_ms);
    let inputs = TickInputs {
        now_ms,
        touch: board.read_touch(),
        reset_level_high: board.reset_level_high(),
        sensors: sensors_due.then(|| board.read_sensors()),
        wall_clock,
    };

    let (outcome, phase_before, phase_after) = {
        let mut engine = app_state.engine.lock().await;
        let phase_before = engine.press_phase();
        let outcome = engine.tick(&inputs);
        if outcome.changed {
            app_state.broadcaster.publish(&engine.snapshot());
        }
        (outcome, phase_before, engine.press_phase())
    };

    if phase_before != phase_after {
        info!(
            from = phase_before.as_str(),
            to = phase_after.as_str(),
            "reset button phase"
        );
    }
    log_tick_outcome(&outcome);

    match outcome.press_action {
        Some(PressAction::EnterConfigPortal) => {
            info!("reset button released after long press; entering config portal");
            provisioner.enter_config_portal();
        }
        Some(PressAction::FactoryReset) => {
            warn!("reset button held; clearing network credentials");
            provisioner.reset_credentials_and_restart();
        }
        None => {}
    }

    outcome
}

fn log_tick_outcome(outcome: &TickOutcome) {
    for (device, on) in &outcome.toggled {
        info!(device, on, "touch toggle");
    }
    for fault in &outcome.faults {
        warn!("input ignored: {fault}");
    }
    if !outcome.sensor_faults.is_empty() {
        warn!(
            fields = ?outcome.sensor_faults,
            "sensor read failed; keeping last known values"
        );
    }
    if let Some(transition) = outcome.schedule {
        info!(
            active = transition.active,
            changed = transition.changed,
            "schedule boundary"
        );
    }
}

fn spawn_heartbeat_loop(app_state: AppState, period: Duration) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            let delivered = publish_heartbeat(&app_state).await;
            debug!(clients = delivered, "heartbeat snapshot");
        }
    });
}

/// Republishes the current snapshot whether or not anything changed.
async fn publish_heartbeat(app_state: &AppState) -> usize {
    let engine = app_state.engine.lock().await;
    app_state.broadcaster.publish(&engine.snapshot())
}

async fn handle_dashboard() -> Html<&'static str> {
    Html(DASHBOARD_HTML)
}

async fn handle_login_page() -> Html<&'static str> {
    Html(LOGIN_HTML)
}

async fn handle_app_js() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "application/javascript; charset=utf-8")],
        APP_JS,
    )
}

async fn handle_style_css() -> impl IntoResponse {
    ([(header::CONTENT_TYPE, "text/css; charset=utf-8")], STYLE_CSS)
}

async fn handle_login(
    State(state): State<AppState>,
    Form(form): Form<LoginForm>,
) -> axum::response::Response {
    if !state.auth.check_credentials(&form.username, &form.password) {
        warn!(username = %form.username, "rejected login");
        return Redirect::to("/login?failed=1").into_response();
    }

    info!(username = %form.username, "login");
    (
        [(header::SET_COOKIE, state.auth.session_cookie())],
        Redirect::to("/"),
    )
        .into_response()
}

async fn handle_logout() -> impl IntoResponse {
    (
        [(header::SET_COOKIE, SessionAuth::cleared_cookie())],
        Redirect::to("/login"),
    )
}

async fn handle_ws(State(state): State<AppState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| client_session(state, socket))
}

async fn client_session(state: AppState, mut socket: WebSocket) {
    let mut subscription = {
        let engine = state.engine.lock().await;
        state.broadcaster.connect(&engine.snapshot())
    };
    let client = subscription.id();
    info!(
        client,
        clients = state.broadcaster.client_count(),
        "dashboard client connected"
    );

    loop {
        tokio::select! {
            snapshot = subscription.next() => {
                let Some(payload) = snapshot else { break };
                if socket.send(Message::Text(payload.to_string().into())).await.is_err() {
                    break;
                }
            }
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    apply_client_message(&state, text.as_str()).await;
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Err(err)) => {
                    debug!(client, "websocket error: {err}");
                    break;
                }
                Some(Ok(_)) => {}
            }
        }
    }

    drop(subscription);
    info!(
        client,
        clients = state.broadcaster.client_count(),
        "dashboard client disconnected"
    );
}

/// Handles one inbound client message. Anything that is not a valid device
/// index is dropped without a reply.
async fn apply_client_message(state: &AppState, message: &str) -> Option<bool> {
    if message.len() > MAX_CLIENT_MESSAGE_BYTES {
        warn!(
            "dropping oversized client message ({} bytes)",
            message.len()
        );
        return None;
    }

    let mut engine = state.engine.lock().await;
    let index = match parse_toggle(message, engine.device_count()) {
        Ok(index) => index,
        Err(err) => {
            warn!("ignoring client message: {err}");
            return None;
        }
    };

    match engine.toggle(index) {
        Ok(on) => {
            info!(device = index, on, "remote toggle");
            state.broadcaster.publish(&engine.snapshot());
            Some(on)
        }
        Err(err) => {
            warn!("remote toggle rejected: {err}");
            None
        }
    }
}

async fn handle_get_status(State(state): State<AppState>) -> impl IntoResponse {
    let time_synced = state.time_synced.load(Ordering::Relaxed);
    let engine = state.engine.lock().await;

    Json(StatusView {
        snapshot: engine.snapshot(),
        device_names: (0..engine.device_count())
            .filter_map(|index| engine.device_name(index).map(str::to_string))
            .collect(),
        reset_phase: engine.press_phase().as_str(),
        clients: state.broadcaster.client_count(),
        schedule_enabled: engine.schedule().enabled,
        time_synced,
    })
}

async fn handle_toggle_device(
    State(state): State<AppState>,
    Path(index): Path<String>,
) -> axum::response::Response {
    {
        let mut engine = state.engine.lock().await;
        let index = match parse_toggle(&index, engine.device_count()) {
            Ok(index) => index,
            Err(err) => return error_response(StatusCode::BAD_REQUEST, &err.to_string()),
        };
        if let Err(err) = engine.toggle(index) {
            return error_response(StatusCode::BAD_REQUEST, &err.to_string());
        }
        state.broadcaster.publish(&engine.snapshot());
    }

    handle_get_status(State(state)).await.into_response()
}

async fn handle_get_schedule(State(state): State<AppState>) -> impl IntoResponse {
    let timezone = state.timezone.lock().await.clone();
    let now = now_in_timezone(&timezone);
    let schedule = state.engine.lock().await.schedule().clone();

    Json(ScheduleView {
        active: now.map(|now| schedule.is_active(&now)),
        next_transition_epoch: now.and_then(|now| schedule.next_transition_epoch(now)),
        time_synced: now.is_some(),
        schedule,
    })
}

async fn handle_post_schedule(
    State(state): State<AppState>,
    Form(params): Form<HashMap<String, String>>,
) -> axum::response::Response {
    {
        let mut engine = state.engine.lock().await;
        let schedule = match parse_schedule_form(engine.schedule(), &params) {
            Ok(schedule) => schedule,
            Err(message) => return error_response(StatusCode::BAD_REQUEST, &message),
        };
        engine.set_schedule(schedule);
    }
    info!("schedule updated");

    if let Err(err) = persist_runtime_from_state(&state).await {
        warn!("failed to persist schedule update: {err:#}");
        return error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to persist schedule",
        );
    }

    handle_get_schedule(State(state)).await.into_response()
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
) -> axum::response::Response {
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

async fn handle_sim_reset_button(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> axum::response::Response {
    match press_value(&params) {
        Some(true) => state.button.press(),
        Some(false) => state.button.release(),
        None => {
            return error_response(
                StatusCode::BAD_REQUEST,
                "Invalid value. Use 'press' or 'release'",
            )
        }
    }

    handle_get_status(State(state)).await.into_response()
}

async fn handle_sim_touch(
    State(state): State<AppState>,
    Path(index): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> axum::response::Response {
    let Some(touched) = press_value(&params) else {
        return error_response(
            StatusCode::BAD_REQUEST,
            "Invalid value. Use 'press' or 'release'",
        );
    };
    let applied = index
        .trim()
        .parse::<usize>()
        .is_ok_and(|index| state.touch.set(index, touched));
    if !applied {
        return error_response(StatusCode::BAD_REQUEST, "Unknown touch input");
    }

    handle_get_status(State(state)).await.into_response()
}

/// `?value=press` → `Some(true)`, `?value=release` → `Some(false)`.
fn press_value(params: &HashMap<String, String>) -> Option<bool> {
    match params.get("value")?.to_ascii_lowercase().as_str() {
        "press" => Some(true),
        "release" => Some(false),
        _ => None,
    }
}

/// Builds a new schedule from a form submission. Weekday checkboxes are
/// present when ticked; `enabled` keeps its current value when absent.
fn parse_schedule_form(
    current: &Schedule,
    params: &HashMap<String, String>,
) -> Result<Schedule, String> {
    let days: WeekdayMask = DayOfWeek::ALL
        .into_iter()
        .filter(|day| params.get(day.key()).is_some_and(|value| is_checked(value)))
        .collect();

    let field = |name: &str| -> Result<u8, String> {
        let value = params
            .get(name)
            .ok_or_else(|| format!("Missing '{name}' field"))?;
        value
            .trim()
            .parse::<u8>()
            .map_err(|_| format!("Invalid '{name}' value"))
    };

    let window = ScheduleWindow::new(
        days,
        field("startHour")?,
        field("startMinute")?,
        field("endHour")?,
        field("endMinute")?,
    )
    .map_err(|err| err.to_string())?;

    Ok(Schedule {
        enabled: params
            .get("enabled")
            .map(|value| is_checked(value))
            .unwrap_or(current.enabled),
        devices: current.devices.clone(),
        window,
    })
}

fn is_checked(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "on" | "true" | "1" | "yes"
    )
}

impl AppStore {
    fn new() -> Self {
        let data_dir = std::env::var("GARDEN_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./.garden"));
        Self::at(data_dir.join("runtime.json"))
    }

    fn at(runtime_path: PathBuf) -> Self {
        Self {
            runtime_path: Arc::new(runtime_path),
            lock: Arc::new(Mutex::new(())),
        }
    }

    fn runtime_path(&self) -> &FsPath {
        self.runtime_path.as_ref()
    }

    async fn load_runtime_config(&self) -> anyhow::Result<RuntimeConfig> {
        let _guard = self.lock.lock().await;
        match tokio::fs::read(self.runtime_path.as_ref()).await {
            Ok(raw) => Ok(serde_json::from_slice::<RuntimeConfig>(&raw)?),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(RuntimeConfig::default()),
            Err(err) => Err(err.into()),
        }
    }

    async fn save_runtime_config(&self, runtime: &RuntimeConfig) -> anyhow::Result<()> {
        let _guard = self.lock.lock().await;
        let path = self.runtime_path.as_ref().clone();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let payload = serde_json::to_vec_pretty(runtime)?;
        tokio::fs::write(&path, payload)
            .await
            .with_context(|| format!("failed to write {}", path.display()))?;
        Ok(())
    }
}

async fn persist_runtime_from_state(state: &AppState) -> anyhow::Result<()> {
    let schedule = state.engine.lock().await.schedule().clone();
    let timezone = state.timezone.lock().await.clone();

    let mut runtime = state.store.load_runtime_config().await?;
    runtime.schedule = schedule;
    runtime.timezone = timezone;
    state.store.save_runtime_config(&runtime).await
}

fn now_in_timezone(timezone: &str) -> Option<chrono::DateTime<chrono::FixedOffset>> {
    let tz: Tz = timezone.parse().ok()?;
    let local = Utc::now().with_timezone(&tz);
    Some(local.with_timezone(&local.offset().fix()))
}

pub fn error_response(status: StatusCode, message: &str) -> axum::response::Response {
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

#[cfg(test)]
mod tests {
    use axum::{
        body::{to_bytes, Body},
        http::Request,
    };
    use garden_common::LoginConfig;
    use pretty_assertions::assert_eq;
    use tower::ServiceExt;

    use super::*;

    struct Harness {
        state: AppState,
        app: Router,
        board: SimBoard,
        cookie: String,
        dir: PathBuf,
    }

    #[derive(Default)]
    struct RecordingProvisioner {
        portals: usize,
        resets: usize,
    }

    impl Provisioner for RecordingProvisioner {
        fn enter_config_portal(&mut self) {
            self.portals += 1;
        }

        fn reset_credentials_and_restart(&mut self) {
            self.resets += 1;
        }
    }

    impl Drop for Harness {
        fn drop(&mut self) {
            let _ = std::fs::remove_dir_all(&self.dir);
        }
    }

    fn harness(name: &str) -> Harness {
        let runtime = RuntimeConfig::default();
        let button = SimButton::default();
        let touch = SimTouchPanel::new(runtime.touch_inputs.len());
        let (board, devices) = SimBoard::new(&runtime, button.clone(), touch.clone());
        let engine = ControllerEngine::new(
            runtime.controller.clone(),
            DeviceStore::new(devices),
            vec![0, 1, 2],
            true,
            runtime.schedule.clone(),
        );
        let dir = std::env::temp_dir().join(format!("garden-host-{}-{name}", std::process::id()));
        let auth = SessionAuth::new(
            LoginConfig {
                username: "admin".to_string(),
                password: "garden".to_string(),
            },
            7,
        );
        let cookie = auth
            .session_cookie()
            .split(';')
            .next()
            .unwrap_or_default()
            .to_string();
        let state = AppState::new(
            engine,
            "UTC".to_string(),
            AppStore::at(dir.join("runtime.json")),
            auth,
            button,
            touch,
        );

        Harness {
            app: build_router(state.clone()),
            state,
            board,
            cookie,
            dir,
        }
    }

    fn get(uri: &str, cookie: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().uri(uri);
        if let Some(cookie) = cookie {
            builder = builder.header(header::COOKIE, cookie);
        }
        builder.body(Body::empty()).unwrap()
    }

    fn post_form(uri: &str, cookie: Option<&str>, body: &str) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded");
        if let Some(cookie) = cookie {
            builder = builder.header(header::COOKIE, cookie);
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    async fn json_body(response: axum::response::Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    async fn device_states(state: &AppState) -> Vec<bool> {
        state.engine.lock().await.snapshot().device_states
    }

    async fn subscribe(state: &AppState) -> crate::sync::Subscription {
        let mut client = {
            let engine = state.engine.lock().await;
            state.broadcaster.connect(&engine.snapshot())
        };
        client.next().await.unwrap();
        client
    }

    async fn next_states(client: &mut crate::sync::Subscription) -> Option<Vec<bool>> {
        let payload = tokio::time::timeout(Duration::from_millis(50), client.next())
            .await
            .ok()??;
        let value: serde_json::Value = serde_json::from_str(&payload).unwrap();
        Some(serde_json::from_value(value["deviceStates"].clone()).unwrap())
    }

    #[tokio::test]
    async fn touch_edge_publishes_one_snapshot() {
        let mut h = harness("tick-touch");
        let mut provisioner = RecordingProvisioner::default();
        let mut client = subscribe(&h.state).await;

        run_tick(&h.state, &mut h.board, &mut provisioner, 0).await;
        assert!(h.state.touch.set(0, true));
        let mut toggled = Vec::new();
        for now in [50, 100, 150, 200] {
            let outcome = run_tick(&h.state, &mut h.board, &mut provisioner, now).await;
            toggled.extend(outcome.toggled);
        }

        assert_eq!(toggled, vec![(0, true)]);
        assert_eq!(
            next_states(&mut client).await,
            Some(vec![true, false, false, false])
        );
        assert_eq!(next_states(&mut client).await, None);
    }

    #[tokio::test]
    async fn quiet_ticks_publish_nothing() {
        let mut h = harness("tick-quiet");
        let mut provisioner = RecordingProvisioner::default();
        let mut client = subscribe(&h.state).await;

        for now in (0..=500).step_by(50) {
            run_tick(&h.state, &mut h.board, &mut provisioner, now).await;
        }

        assert_eq!(next_states(&mut client).await, None);
    }

    #[tokio::test]
    async fn held_reset_button_restarts_exactly_once() {
        let mut h = harness("tick-reset");
        let mut provisioner = RecordingProvisioner::default();

        run_tick(&h.state, &mut h.board, &mut provisioner, 0).await;
        h.state.button.press();
        for now in (50..=5_000).step_by(50) {
            run_tick(&h.state, &mut h.board, &mut provisioner, now).await;
        }
        h.state.button.release();
        for now in [5_050, 5_100, 5_150] {
            run_tick(&h.state, &mut h.board, &mut provisioner, now).await;
        }

        assert_eq!(provisioner.resets, 1);
        assert_eq!(provisioner.portals, 0);
        assert_eq!(h.state.engine.lock().await.press_phase().as_str(), "IDLE");
    }

    #[tokio::test]
    async fn config_hold_opens_portal_on_release() {
        let mut h = harness("tick-portal");
        let mut provisioner = RecordingProvisioner::default();

        run_tick(&h.state, &mut h.board, &mut provisioner, 0).await;
        h.state.button.press();
        for now in (50..=2_600).step_by(50) {
            run_tick(&h.state, &mut h.board, &mut provisioner, now).await;
        }
        assert_eq!(provisioner.portals, 0);

        h.state.button.release();
        for now in [2_650, 2_700, 2_750] {
            run_tick(&h.state, &mut h.board, &mut provisioner, now).await;
        }

        assert_eq!(provisioner.portals, 1);
        assert_eq!(provisioner.resets, 0);
    }

    #[tokio::test]
    async fn heartbeat_republishes_unchanged_state() {
        let h = harness("heartbeat");
        let mut client = subscribe(&h.state).await;

        assert_eq!(publish_heartbeat(&h.state).await, 1);

        assert_eq!(next_states(&mut client).await, Some(vec![false; 4]));
        assert_eq!(device_states(&h.state).await, vec![false; 4]);
    }

    #[tokio::test]
    async fn sim_touch_endpoint_drives_the_pad() {
        let mut h = harness("sim-touch");

        let response = h
            .app
            .clone()
            .oneshot(post_form("/api/sim/touch/1?value=press", Some(&h.cookie), ""))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(h.board.read_touch()[1] < 100);

        for uri in ["/api/sim/touch/7?value=press", "/api/sim/touch/1?value=hold"] {
            let response = h
                .app
                .clone()
                .oneshot(post_form(uri, Some(&h.cookie), ""))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        }
    }

    #[tokio::test]
    async fn api_requires_login() {
        let h = harness("auth");

        let response = h.app.clone().oneshot(get("/api/status", None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = h.app.clone().oneshot(get("/", None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(response.headers()[header::LOCATION], "/login");

        let response = h
            .app
            .clone()
            .oneshot(get("/api/status", Some(&h.cookie)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn login_sets_session_cookie() {
        let h = harness("login");

        let response = h
            .app
            .clone()
            .oneshot(post_form("/login", None, "username=admin&password=garden"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        let set_cookie = response.headers()[header::SET_COOKIE].to_str().unwrap();
        assert!(set_cookie.starts_with(&h.cookie));

        let response = h
            .app
            .clone()
            .oneshot(post_form("/login", None, "username=admin&password=wrong"))
            .await
            .unwrap();
        assert_eq!(response.headers()[header::LOCATION], "/login?failed=1");
        assert!(response.headers().get(header::SET_COOKIE).is_none());
    }

    #[tokio::test]
    async fn status_reports_snapshot_fields() {
        let h = harness("status");

        let response = h
            .app
            .clone()
            .oneshot(get("/api/status", Some(&h.cookie)))
            .await
            .unwrap();
        let body = json_body(response).await;

        assert_eq!(
            body["deviceStates"],
            serde_json::json!([false, false, false, false])
        );
        assert!(body["temperature"].is_null());
        assert_eq!(body["deviceNames"][0], "Device 1");
        assert_eq!(body["resetPhase"], "IDLE");
    }

    #[tokio::test]
    async fn http_toggle_updates_store_and_clients() {
        let h = harness("toggle");
        let mut client = {
            let engine = h.state.engine.lock().await;
            h.state.broadcaster.connect(&engine.snapshot())
        };
        client.next().await.unwrap();

        let response = h
            .app
            .clone()
            .oneshot(post_form("/api/devices/1/toggle", Some(&h.cookie), ""))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let pushed = client.next().await.unwrap();
        let pushed: serde_json::Value = serde_json::from_str(&pushed).unwrap();
        assert_eq!(
            pushed["deviceStates"],
            serde_json::json!([false, true, false, false])
        );

        let response = h
            .app
            .clone()
            .oneshot(post_form("/api/devices/9/toggle", Some(&h.cookie), ""))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(device_states(&h.state).await, vec![false, true, false, false]);
    }

    #[tokio::test]
    async fn client_messages_toggle_in_order() {
        let h = harness("client-order");

        assert_eq!(apply_client_message(&h.state, "0").await, Some(true));
        assert_eq!(apply_client_message(&h.state, "1").await, Some(true));
        assert_eq!(apply_client_message(&h.state, "0").await, Some(false));

        assert_eq!(device_states(&h.state).await, vec![false, true, false, false]);
    }

    #[tokio::test]
    async fn bad_client_messages_change_nothing() {
        let h = harness("client-bad");
        let mut client = {
            let engine = h.state.engine.lock().await;
            h.state.broadcaster.connect(&engine.snapshot())
        };
        client.next().await.unwrap();

        for message in ["-1", "4", "on", "", "99999999999999999999"] {
            assert_eq!(apply_client_message(&h.state, message).await, None);
        }

        assert_eq!(device_states(&h.state).await, vec![false; 4]);
        let pending = tokio::time::timeout(Duration::from_millis(50), client.next()).await;
        assert!(pending.is_err());
    }

    #[tokio::test]
    async fn schedule_form_replaces_window_and_persists() {
        let h = harness("schedule");

        let response = h
            .app
            .clone()
            .oneshot(post_form(
                "/api/schedule",
                Some(&h.cookie),
                "mon=on&wed=on&fri=on&startHour=22&startMinute=0&endHour=6&endMinute=30&enabled=on",
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(
            body["schedule"]["window"]["days"],
            serde_json::json!(["MON", "WED", "FRI"])
        );
        assert_eq!(body["schedule"]["enabled"], true);

        let stored: RuntimeConfig =
            serde_json::from_slice(&std::fs::read(h.dir.join("runtime.json")).unwrap()).unwrap();
        assert_eq!(stored.schedule.window.end_minute, 30);
        assert_eq!(stored.timezone, "UTC");
    }

    #[tokio::test]
    async fn invalid_schedule_keeps_previous_window() {
        let h = harness("schedule-bad");
        let before = h.state.engine.lock().await.schedule().clone();

        for body in [
            "mon=on&startHour=25&startMinute=0&endHour=6&endMinute=0",
            "mon=on&startHour=22&startMinute=0&endHour=6",
            "mon=on&startHour=ten&startMinute=0&endHour=6&endMinute=0",
        ] {
            let response = h
                .app
                .clone()
                .oneshot(post_form("/api/schedule", Some(&h.cookie), body))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        }

        assert_eq!(h.state.engine.lock().await.schedule(), &before);
    }

    #[tokio::test]
    async fn schedule_post_builds_on_the_latest_schedule() {
        let h = harness("schedule-latest");

        for body in [
            "mon=on&startHour=6&startMinute=0&endHour=7&endMinute=0&enabled=on",
            "tue=on&startHour=8&startMinute=0&endHour=9&endMinute=0",
        ] {
            let response = h
                .app
                .clone()
                .oneshot(post_form("/api/schedule", Some(&h.cookie), body))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }

        let schedule = h.state.engine.lock().await.schedule().clone();
        assert!(schedule.enabled);
        assert_eq!(schedule.window.start_hour, 8);
        assert_eq!(
            schedule.window.days.days().collect::<Vec<_>>(),
            vec![DayOfWeek::Tue]
        );
    }

    #[test]
    fn schedule_form_keeps_enabled_when_absent() {
        let current = Schedule {
            enabled: true,
            ..Schedule::default()
        };
        let params: HashMap<String, String> = [
            ("sat", "on"),
            ("startHour", "7"),
            ("startMinute", "15"),
            ("endHour", "8"),
            ("endMinute", "0"),
        ]
        .into_iter()
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .collect();

        let schedule = parse_schedule_form(&current, &params).unwrap();

        assert!(schedule.enabled);
        assert_eq!(
            schedule.window.days.days().collect::<Vec<_>>(),
            vec![DayOfWeek::Sat]
        );
        assert_eq!(schedule.devices, current.devices);
    }

    #[tokio::test]
    async fn rejects_unknown_timezone() {
        let h = harness("timezone");

        let request = Request::builder()
            .method("PUT")
            .uri("/api/timezone")
            .header(header::COOKIE, &h.cookie)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(r#"{"timezone":"Mars/Olympus"}"#))
            .unwrap();
        let response = h.app.clone().oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(*h.state.timezone.lock().await, "UTC");
    }
}
