//! antsim_api: REST/WebSocket façade for the NEC-2 simulation broker.
//!
//! Endpoints (JSON unless noted, all under /api):
//! - GET  /v1/health             -> { status, version, solver_available, cache_connected, environment }
//! - POST /v1/simulate           SimulationRequest -> SimulationResult
//!                               (422 on solver/parse failure, 429 on admission)
//! - POST /v1/optimize           OptimizationRequest -> OptimizationResult
//! - POST /v1/convert/import     { content, format: "maa"|"nec" } -> parsed structure
//! - POST /v1/convert/export     antenna + format -> { content, format, filename_suggestion }
//! - WS   /v1/ws/optimize        first message: OptimizationRequest,
//!                               then a stream of { type: "progress"|"result"|"error", data }
//!
//! Error envelope: { error: <tag>, message, simulation_id? } with tags
//! rate_limit_exceeded, concurrent_limit_exceeded, simulation_failed,
//! parse_failed, no_results, optimization_failed, validation_failed,
//! invalid_format.

#![forbid(unsafe_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        ConnectInfo, DefaultBodyLimit, State, WebSocketUpgrade,
    },
    http::{HeaderMap, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use futures::{SinkExt, StreamExt};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tower_governor::{governor::GovernorConfigBuilder, key_extractor::SmartIpKeyExtractor, GovernorLayer};
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};
use tracing::{error, info, warn};

use antsim::admission::{client_addr, Admission, AdmissionConfig, AdmissionRejection};
use antsim::antenna::{Excitation, GroundConfig, LumpedLoad, TransmissionLine, Wire};
use antsim::cache::{cache_key, get_cached_result, set_cached_result};
use antsim::convert::{export_maa, parse_maa, parse_nec_file};
use antsim::deck::build_card_deck;
use antsim::kvs::Kvs;
use antsim::optimizer::{
    run_optimization, OptimizationProgress, OptimizationRequest, OptimizationResult,
    OptimizeError, SolverEvaluator,
};
use antsim::output::parse_nec_output;
use antsim::request::{FrequencyConfig, SimulationRequest};
use antsim::results::SimulationResult;
use antsim::runner::SolverRunner;
use antsim::settings::Settings;

// ------------------------------ Error envelope ------------------------------

#[derive(Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    simulation_id: Option<String>,
}

struct ApiError {
    status: StatusCode,
    body: ErrorBody,
    retry_after: Option<u64>,
}

impl ApiError {
    fn new(status: StatusCode, tag: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            body: ErrorBody {
                error: tag,
                message: message.into(),
                simulation_id: None,
            },
            retry_after: None,
        }
    }

    fn validation_failed(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "validation_failed", message)
    }

    fn invalid_format(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "invalid_format", message)
    }

    fn simulation_failed(message: impl Into<String>, sim_id: &str) -> Self {
        Self::new(StatusCode::UNPROCESSABLE_ENTITY, "simulation_failed", message)
            .with_simulation_id(sim_id)
    }

    fn parse_failed(sim_id: &str) -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "parse_failed",
            "failed to parse solver output",
        )
        .with_simulation_id(sim_id)
    }

    fn no_results(sim_id: &str) -> Self {
        Self::new(
            StatusCode::UNPROCESSABLE_ENTITY,
            "no_results",
            "solver produced no usable results — check geometry",
        )
        .with_simulation_id(sim_id)
    }

    fn optimization_failed(message: impl Into<String>) -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "optimization_failed",
            message,
        )
    }

    fn with_simulation_id(mut self, sim_id: &str) -> Self {
        self.body.simulation_id = Some(sim_id.to_string());
        self
    }

    fn from_rejection(rejection: AdmissionRejection) -> Self {
        let retry_after = rejection.retry_after();
        let mut err = match rejection {
            AdmissionRejection::RateLimit { limit, .. } => Self::new(
                StatusCode::TOO_MANY_REQUESTS,
                "rate_limit_exceeded",
                format!("rate limit of {limit} simulations per hour exceeded"),
            ),
            AdmissionRejection::ConcurrentLimit { limit, .. } => Self::new(
                StatusCode::TOO_MANY_REQUESTS,
                "concurrent_limit_exceeded",
                format!("maximum {limit} concurrent simulations exceeded"),
            ),
        };
        err.retry_after = Some(retry_after);
        err
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut response = (self.status, Json(self.body)).into_response();
        if let Some(secs) = self.retry_after {
            if let Ok(value) = secs.to_string().parse() {
                response.headers_mut().insert("Retry-After", value);
            }
        }
        response
    }
}

// ------------------------------ State ------------------------------

#[derive(Clone)]
struct AppState {
    settings: Arc<Settings>,
    kvs: Option<Kvs>,
    admission: Admission,
    runner: SolverRunner,
    /// Process-wide bound on solver subprocesses, across all clients.
    solver_slots: Arc<Semaphore>,
}

fn random_id() -> String {
    let mut bytes = [0u8; 6];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

// ------------------------------ Health ------------------------------

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    solver_available: bool,
    cache_connected: bool,
    environment: String,
}

async fn health(State(st): State<AppState>) -> Json<HealthResponse> {
    let cache_connected = match &st.kvs {
        Some(kvs) => kvs.ping().await,
        None => false,
    };
    Json(HealthResponse {
        status: "ok",
        version: antsim::VERSION,
        solver_available: st.settings.solver_available(),
        cache_connected,
        environment: st.settings.environment.clone(),
    })
}

// ------------------------------ Simulate ------------------------------

async fn simulate(
    State(st): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(request): Json<SimulationRequest>,
) -> Result<Json<SimulationResult>, ApiError> {
    request
        .validate()
        .map_err(|e| ApiError::validation_failed(e.to_string()))?;

    let addr = request_addr(&headers, peer);
    st.admission
        .check(&addr)
        .await
        .map_err(ApiError::from_rejection)?;

    let result = run_simulation(&st, &request).await;
    st.admission.release(&addr).await;
    result.map(Json)
}

async fn run_simulation(
    st: &AppState,
    request: &SimulationRequest,
) -> Result<SimulationResult, ApiError> {
    let sim_id = random_id();
    let total_segments = request.total_segments();

    info!(
        "simulation {sim_id}: {} wires, {total_segments} segments, {:.1}-{:.1} MHz ({} steps)",
        request.wires.len(),
        request.frequency.start_mhz,
        request.frequency.stop_mhz,
        request.frequency.steps,
    );

    let key = cache_key(request);
    if let Some(kvs) = &st.kvs {
        if let Some(mut cached) = get_cached_result(kvs, &key).await {
            cached.simulation_id = sim_id;
            cached.cached = true;
            cached.computed_in_ms = 0.0;
            return Ok(cached);
        }
    }

    let deck = build_card_deck(request);

    let _slot = st.solver_slots.acquire().await.map_err(|_| {
        ApiError::simulation_failed("solver slots unavailable", &sim_id)
    })?;

    let started = std::time::Instant::now();
    let output = st
        .runner
        .run(&deck)
        .await
        .map_err(|e| {
            error!("simulation {sim_id} failed: {e}");
            ApiError::simulation_failed(e.to_string(), &sim_id)
        })?;
    let computed_in_ms = (started.elapsed().as_secs_f64() * 10_000.0).round() / 10.0;

    let pattern = request.pattern.clone();
    let compute_currents = request.compute_currents;
    let frequency_data = tokio::task::spawn_blocking(move || {
        parse_nec_output(&output, &pattern, compute_currents)
    })
    .await
    .map_err(|e| {
        error!("output parsing failed for {sim_id}: {e}");
        ApiError::parse_failed(&sim_id)
    })?;

    if frequency_data.is_empty() {
        return Err(ApiError::no_results(&sim_id));
    }

    let mut warnings = Vec::new();
    for fd in &frequency_data {
        if fd.swr_50 > 10.0 {
            warnings.push(format!(
                "Very high SWR ({:.1}) at {:.3} MHz",
                fd.swr_50, fd.frequency_mhz
            ));
        }
        if fd.impedance.real < 1.0 {
            warnings.push(format!(
                "Very low feed resistance ({:.1} Ω) at {:.3} MHz",
                fd.impedance.real, fd.frequency_mhz
            ));
        }
    }

    let max_gain = frequency_data
        .iter()
        .map(|fd| fd.gain_max_dbi)
        .fold(f64::NEG_INFINITY, f64::max);
    info!(
        "simulation {sim_id} complete: {computed_in_ms:.0}ms, {} freq points, max gain={max_gain:.1} dBi",
        frequency_data.len()
    );

    let result = SimulationResult {
        simulation_id: sim_id,
        engine: "nec2c".to_string(),
        computed_in_ms,
        total_segments,
        cached: false,
        frequency_data,
        warnings,
    };

    if let Some(kvs) = &st.kvs {
        set_cached_result(kvs, &key, &result).await;
    }

    Ok(result)
}

// ------------------------------ Optimize (REST) ------------------------------

async fn optimize(
    State(st): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(request): Json<OptimizationRequest>,
) -> Result<Json<OptimizationResult>, ApiError> {
    request
        .validate()
        .map_err(|e| ApiError::validation_failed(e.to_string()))?;

    let addr = request_addr(&headers, peer);
    st.admission
        .check(&addr)
        .await
        .map_err(ApiError::from_rejection)?;

    info!(
        "optimization request: {} variables, {:?} objective, max {} iterations",
        request.variables.len(),
        request.objective,
        request.max_iterations,
    );

    let result = run_optimize_task(&st, request, None, Arc::new(AtomicBool::new(false))).await;
    st.admission.release(&addr).await;

    match result {
        Ok(result) => {
            info!(
                "optimization complete: status={:?}, iterations={}, cost={:.4}",
                result.status, result.iterations_used, result.final_cost,
            );
            Ok(Json(result))
        }
        Err(e) => Err(ApiError::optimization_failed(e)),
    }
}

/// Run the blocking Nelder-Mead search on a worker thread, holding one
/// solver slot for the whole search.
async fn run_optimize_task(
    st: &AppState,
    request: OptimizationRequest,
    progress_tx: Option<tokio::sync::mpsc::Sender<OptimizationProgress>>,
    cancelled: Arc<AtomicBool>,
) -> Result<OptimizationResult, String> {
    let _slot = st
        .solver_slots
        .acquire()
        .await
        .map_err(|_| "solver slots unavailable".to_string())?;

    let evaluator = SolverEvaluator::new(st.runner.clone(), tokio::runtime::Handle::current());
    let joined = tokio::task::spawn_blocking(move || {
        let progress_fn = progress_tx.map(|tx| {
            move |p: OptimizationProgress| {
                // advisory stream: drop on full
                let _ = tx.try_send(p);
            }
        });
        match progress_fn {
            Some(ref f) => run_optimization(
                &request,
                &evaluator,
                Some(f as &(dyn Fn(OptimizationProgress) + Send + Sync)),
                &cancelled,
            ),
            None => run_optimization(&request, &evaluator, None, &cancelled),
        }
    })
    .await;

    match joined {
        Ok(Ok(result)) => Ok(result),
        Ok(Err(OptimizeError::Cancelled)) => Err("optimization cancelled by client".to_string()),
        Err(e) => {
            error!("optimization task failed: {e}");
            Err("optimization task failed".to_string())
        }
    }
}

// ------------------------------ Optimize (WebSocket) ------------------------------

async fn ws_optimize(
    State(st): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let addr = request_addr(&headers, peer);
    if let Err(rejection) = st.admission.check(&addr).await {
        return ApiError::from_rejection(rejection).into_response();
    }
    ws.on_upgrade(move |socket| async move {
        optimize_session(&st, socket).await;
        st.admission.release(&addr).await;
    })
    .into_response()
}

fn ws_json(kind: &str, data: serde_json::Value) -> Message {
    Message::Text(serde_json::json!({ "type": kind, "data": data }).to_string())
}

async fn optimize_session(st: &AppState, socket: WebSocket) {
    let (mut sender, mut receiver) = socket.split();

    // First message carries the optimization request.
    let request = loop {
        match receiver.next().await {
            Some(Ok(Message::Text(text))) => {
                match serde_json::from_str::<OptimizationRequest>(&text) {
                    Ok(request) => match request.validate() {
                        Ok(()) => break request,
                        Err(e) => {
                            let _ = sender
                                .send(ws_json("error", serde_json::json!({ "message": e.to_string() })))
                                .await;
                            let _ = sender.close().await;
                            return;
                        }
                    },
                    Err(e) => {
                        let _ = sender
                            .send(ws_json(
                                "error",
                                serde_json::json!({ "message": format!("invalid request: {e}") }),
                            ))
                            .await;
                        let _ = sender.close().await;
                        return;
                    }
                }
            }
            Some(Ok(Message::Close(_))) | None => return,
            Some(Ok(_)) => continue,
            Some(Err(e)) => {
                warn!("ws optimizer receive error: {e}");
                return;
            }
        }
    };

    info!(
        "ws optimizer: {} variables, {:?} objective, max {} iterations",
        request.variables.len(),
        request.objective,
        request.max_iterations,
    );

    let cancelled = Arc::new(AtomicBool::new(false));
    let (progress_tx, mut progress_rx) = tokio::sync::mpsc::channel::<OptimizationProgress>(32);

    // Watch the client side for disconnect/close while the search runs.
    let cancel_flag = Arc::clone(&cancelled);
    let reader = tokio::spawn(async move {
        while let Some(msg) = receiver.next().await {
            match msg {
                Ok(Message::Close(_)) | Err(_) => break,
                _ => {}
            }
        }
        cancel_flag.store(true, Ordering::Relaxed);
    });

    let search = run_optimize_task(st, request, Some(progress_tx), Arc::clone(&cancelled));
    tokio::pin!(search);

    let mut outcome = None;
    // Drain progress while the search runs; the channel closes when the
    // search ends.
    loop {
        tokio::select! {
            maybe = progress_rx.recv() => match maybe {
                Some(progress) => {
                    let payload = serde_json::to_value(&progress).unwrap_or_default();
                    if sender.send(ws_json("progress", payload)).await.is_err() {
                        cancelled.store(true, Ordering::Relaxed);
                    }
                }
                None => break,
            },
            result = &mut search, if outcome.is_none() => {
                outcome = Some(result);
            }
        }
    }
    let outcome = match outcome {
        Some(outcome) => outcome,
        None => search.await,
    };

    // Flush progress that arrived between the last send and completion.
    while let Ok(progress) = progress_rx.try_recv() {
        if cancelled.load(Ordering::Relaxed) {
            break;
        }
        let payload = serde_json::to_value(&progress).unwrap_or_default();
        if sender.send(ws_json("progress", payload)).await.is_err() {
            cancelled.store(true, Ordering::Relaxed);
        }
    }

    match outcome {
        Ok(result) => {
            if cancelled.load(Ordering::Relaxed) {
                info!("ws optimizer cancelled by client");
            } else {
                let payload = serde_json::to_value(&result).unwrap_or_default();
                let _ = sender.send(ws_json("result", payload)).await;
            }
        }
        Err(message) => {
            if cancelled.load(Ordering::Relaxed) {
                info!("ws optimizer cancelled by client");
            } else {
                error!("ws optimizer error: {message}");
                let _ = sender
                    .send(ws_json("error", serde_json::json!({ "message": message })))
                    .await;
            }
        }
    }

    let _ = sender.close().await;
    reader.abort();
}

// ------------------------------ Convert ------------------------------

#[derive(Deserialize)]
struct ImportRequest {
    content: String,
    format: String,
}

#[derive(Serialize)]
struct ImportResponse {
    title: String,
    wires: Vec<Wire>,
    excitations: Vec<Excitation>,
    loads: Vec<LumpedLoad>,
    transmission_lines: Vec<TransmissionLine>,
    ground_type: String,
    ground_dielectric: f64,
    ground_conductivity: f64,
    frequency_start_mhz: f64,
    frequency_stop_mhz: f64,
    frequency_steps: u32,
    warnings: Vec<String>,
}

fn default_export_title() -> String {
    "AntennaSim export".to_string()
}

fn default_export_freq_start() -> f64 {
    14.0
}

fn default_export_freq_stop() -> f64 {
    14.5
}

fn default_export_freq_steps() -> u32 {
    11
}

#[derive(Deserialize)]
struct ExportRequest {
    format: String,
    #[serde(default = "default_export_title")]
    title: String,
    wires: Vec<Wire>,
    excitations: Vec<Excitation>,
    #[serde(default)]
    loads: Vec<LumpedLoad>,
    #[serde(default)]
    transmission_lines: Vec<TransmissionLine>,
    #[serde(default)]
    ground: GroundConfig,
    #[serde(default = "default_export_freq_start")]
    frequency_start_mhz: f64,
    #[serde(default = "default_export_freq_stop")]
    frequency_stop_mhz: f64,
    #[serde(default = "default_export_freq_steps")]
    frequency_steps: u32,
}

#[derive(Serialize)]
struct ExportResponse {
    content: String,
    format: &'static str,
    filename_suggestion: &'static str,
}

async fn convert_import(
    Json(request): Json<ImportRequest>,
) -> Result<Json<ImportResponse>, ApiError> {
    match request.format.to_lowercase().as_str() {
        "maa" => {
            let data = parse_maa(&request.content)
                .map_err(|e| ApiError::invalid_format(format!("invalid .maa file: {e}")))?;
            Ok(Json(ImportResponse {
                title: data.title,
                wires: data.wires,
                excitations: data.excitations,
                loads: data.loads,
                transmission_lines: vec![],
                ground_type: data.ground.ground_type.as_str().to_string(),
                ground_dielectric: data.ground.dielectric_constant,
                ground_conductivity: data.ground.conductivity,
                frequency_start_mhz: data.frequency_mhz - 0.5,
                frequency_stop_mhz: data.frequency_mhz + 0.5,
                frequency_steps: 21,
                warnings: vec![],
            }))
        }
        "nec" => {
            let data = parse_nec_file(&request.content)
                .map_err(|e| ApiError::invalid_format(format!("invalid .nec file: {e}")))?;
            Ok(Json(ImportResponse {
                title: data.comment,
                wires: data.wires,
                excitations: data.excitations,
                loads: data.loads,
                transmission_lines: data.transmission_lines,
                ground_type: data.ground.ground_type.as_str().to_string(),
                ground_dielectric: data.ground.dielectric_constant,
                ground_conductivity: data.ground.conductivity,
                frequency_start_mhz: data.frequency_start_mhz,
                frequency_stop_mhz: data.frequency_stop_mhz,
                frequency_steps: data.frequency_steps,
                warnings: vec![],
            }))
        }
        other => Err(ApiError::invalid_format(format!(
            "unsupported import format: '{other}'. Use 'maa' or 'nec'."
        ))),
    }
}

async fn convert_export(
    Json(request): Json<ExportRequest>,
) -> Result<Json<ExportResponse>, ApiError> {
    match request.format.to_lowercase().as_str() {
        "maa" => {
            let content = export_maa(
                &request.title,
                &request.wires,
                &request.excitations,
                &request.loads,
                (request.frequency_start_mhz + request.frequency_stop_mhz) / 2.0,
            );
            Ok(Json(ExportResponse {
                content,
                format: "maa",
                filename_suggestion: "antenna.maa",
            }))
        }
        "nec" => {
            let sim_request = SimulationRequest {
                wires: request.wires,
                excitations: request.excitations,
                ground: request.ground,
                frequency: FrequencyConfig {
                    start_mhz: request.frequency_start_mhz,
                    stop_mhz: request.frequency_stop_mhz,
                    steps: request.frequency_steps,
                },
                pattern: Default::default(),
                comment: request.title,
                loads: request.loads,
                transmission_lines: request.transmission_lines,
                compute_currents: false,
                arcs: vec![],
                transforms: vec![],
                symmetry: None,
                near_field: None,
            };
            sim_request
                .validate()
                .map_err(|e| ApiError::validation_failed(e.to_string()))?;
            Ok(Json(ExportResponse {
                content: build_card_deck(&sim_request),
                format: "nec",
                filename_suggestion: "antenna.nec",
            }))
        }
        other => Err(ApiError::invalid_format(format!(
            "unsupported export format: '{other}'. Use 'maa' or 'nec'."
        ))),
    }
}

// ------------------------------ Helpers ------------------------------

fn request_addr(headers: &HeaderMap, peer: SocketAddr) -> String {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|h| h.to_str().ok());
    client_addr(forwarded, Some(&peer.ip().to_string()))
}

// ------------------------------ Main ------------------------------

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = Arc::new(Settings::from_env());

    tracing_subscriber::fmt()
        .with_env_filter(std::env::var("RUST_LOG").unwrap_or_else(|_| {
            format!(
                "antsim={level},antsim_api={level},tower_http=info",
                level = settings.log_level
            )
        }))
        .with_target(false)
        .compact()
        .init();

    info!("AntSim backend starting — env={}", settings.environment);

    if settings.solver_available() {
        info!("solver '{}' found in PATH", settings.nec_bin);
    } else {
        warn!("solver '{}' NOT found — simulations will fail", settings.nec_bin);
    }

    if let Err(e) = std::fs::create_dir_all(&settings.nec_workdir) {
        warn!("could not create workdir {}: {e}", settings.nec_workdir);
    }

    let kvs = Kvs::from_settings(&settings);
    match &kvs {
        Some(kvs) => {
            if kvs.ping().await {
                info!("key-value store connected");
            } else {
                warn!("key-value store unreachable — caching and admission degraded");
            }
        }
        None => warn!("no REDIS_URL configured — caching and admission disabled"),
    }

    let admission = Admission::new(kvs.clone(), AdmissionConfig::from_settings(&settings));
    let runner = SolverRunner::new(&settings);
    let state = AppState {
        settings: Arc::clone(&settings),
        kvs,
        admission,
        runner,
        solver_slots: Arc::new(Semaphore::new(settings.max_concurrent_sims.max(1))),
    };

    let origins = settings.cors_origins();
    let cors = if origins.iter().any(|o| o == "*") {
        warn!("CORS set to permissive mode (*)");
        CorsLayer::permissive()
    } else {
        info!("CORS configured for origins: {origins:?}");
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(
                origins.iter().filter_map(|o| o.parse().ok()),
            ))
            .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
            .allow_headers([
                axum::http::header::AUTHORIZATION,
                axum::http::header::CONTENT_TYPE,
            ])
            .allow_credentials(true)
            .max_age(std::time::Duration::from_secs(3600))
    };

    let governor_conf = Box::leak(Box::new(
        GovernorConfigBuilder::default()
            .per_second(10)
            .burst_size(30)
            .key_extractor(SmartIpKeyExtractor)
            .finish()
            .unwrap(),
    ));

    let api = Router::new()
        .route("/v1/health", get(health))
        .route("/v1/simulate", post(simulate))
        .route("/v1/optimize", post(optimize))
        .route("/v1/convert/import", post(convert_import))
        .route("/v1/convert/export", post(convert_export))
        .route("/v1/ws/optimize", get(ws_optimize));

    let app = Router::new()
        .nest("/api", api)
        .layer(DefaultBodyLimit::max(8 * 1024 * 1024))
        .layer(GovernorLayer {
            config: governor_conf,
        })
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = std::env::var("ANTSIM_ADDR")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], 8000)));

    info!("antsim API listening on http://{addr}");

    let listener = TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}
