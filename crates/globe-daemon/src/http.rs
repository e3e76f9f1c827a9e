use crate::core::{CommandError, CoreEvent};
use crate::BroadcastMessage;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Json, Response,
    },
    routing::{delete, get, post},
    Router,
};
use futures_util::stream::{self, Stream};
use globe_core::config::GlobeConfig;
use globe_core::error::PlaybackError;
use globe_core::geo::{markers, Marker};
use globe_core::protocol::{Command, FetchStatus, PlaybackSnapshot, StationRecord};
use globe_core::state::StateManager;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, oneshot};
use tower_http::cors::CorsLayer;
use tracing::{debug, error, info, warn};

#[derive(Clone)]
pub struct HttpState {
    pub state_manager: Arc<StateManager>,
    pub event_tx: mpsc::Sender<CoreEvent>,
    pub broadcast_tx: broadcast::Sender<BroadcastMessage>,
    pub globe: GlobeConfig,
}

#[derive(Serialize)]
struct ApiState {
    rev: u64,
    selected_country: Option<String>,
    list_title: String,
    button_label: &'static str,
    playback: PlaybackSnapshot,
    station_count: usize,
    country_count: usize,
    fetch: FetchStatus,
}

#[derive(Serialize)]
struct ApiCountries {
    globe_radius: f64,
    marker_radius: f64,
    markers: Vec<Marker>,
}

#[derive(Deserialize)]
struct StationsQuery {
    /// Falls back to the selected country when absent or empty.
    country: Option<String>,
    #[serde(default)]
    q: String,
}

#[derive(Serialize)]
struct ApiStations {
    title: String,
    country: Option<String>,
    stations: Vec<StationInfo>,
}

#[derive(Serialize)]
struct StationInfo {
    id: String,
    name: String,
    subtitle: String,
    format: String,
    tags: Vec<String>,
    url: String,
}

impl From<&StationRecord> for StationInfo {
    fn from(s: &StationRecord) -> Self {
        Self {
            id: s.id.clone(),
            name: s.name.clone(),
            subtitle: s.subtitle(),
            format: s.format_line(),
            tags: s.tag_list().into_iter().map(str::to_string).collect(),
            url: s.stream_url().to_string(),
        }
    }
}

#[derive(Serialize)]
struct ApiError {
    error: String,
}

pub fn router(state: HttpState) -> Router {
    Router::new()
        .route("/api/state", get(get_state))
        .route("/api/countries", get(get_countries))
        .route("/api/stations", get(get_stations))
        .route("/api/country", delete(clear_country))
        .route("/api/country/:name", post(select_country))
        .route("/api/select/:id", post(select_station))
        .route("/api/play", post(play))
        .route("/api/pause", post(pause))
        .route("/api/stop", post(stop))
        .route("/api/volume/:volume", post(set_volume))
        .route("/api/refresh", post(refresh))
        .route("/api/events", get(events))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub fn start_server(bind_address: String, port: u16, state: HttpState) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let app = router(state);

        let addr = format!("{}:{}", bind_address, port);
        let listener = match TcpListener::bind(&addr).await {
            Ok(l) => l,
            Err(e) => {
                error!("Failed to bind HTTP server to {}: {}", addr, e);
                return;
            }
        };

        info!("HTTP API server listening on http://{}", addr);

        if let Err(e) = axum::serve(listener, app).await {
            error!("HTTP server error: {}", e);
        }
    })
}

fn status_for(err: &CommandError) -> StatusCode {
    match err {
        CommandError::UnknownStation(_) | CommandError::UnknownCountry(_) => StatusCode::NOT_FOUND,
        CommandError::Playback(PlaybackError::Media(_)) => StatusCode::BAD_GATEWAY,
        CommandError::Playback(_) => StatusCode::CONFLICT,
    }
}

/// Send a command to the core and wait for its outcome.
async fn dispatch(state: &HttpState, cmd: Command) -> Response {
    let (reply_tx, reply_rx) = oneshot::channel();
    let evt = CoreEvent::ClientCommand {
        cmd,
        reply: Some(reply_tx),
    };
    if state.event_tx.send(evt).await.is_err() {
        error!("Failed to send command to core");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }
    match reply_rx.await {
        Ok(Ok(())) => StatusCode::OK.into_response(),
        Ok(Err(e)) => {
            warn!("HTTP API: command rejected: {}", e);
            let body = ApiError {
                error: e.to_string(),
            };
            (status_for(&e), Json(body)).into_response()
        }
        Err(_) => StatusCode::SERVICE_UNAVAILABLE.into_response(),
    }
}

async fn get_state(State(state): State<HttpState>) -> Json<ApiState> {
    let s = state.state_manager.get_state().await;
    Json(ApiState {
        rev: s.rev,
        list_title: s.list_title(),
        button_label: s.playback.status.button_label(),
        station_count: s.catalog.len(),
        country_count: s.catalog.countries().len(),
        selected_country: s.selected_country,
        playback: s.playback,
        fetch: s.fetch,
    })
}

async fn get_countries(State(state): State<HttpState>) -> Json<ApiCountries> {
    let s = state.state_manager.get_state().await;
    Json(ApiCountries {
        globe_radius: state.globe.radius,
        marker_radius: state.globe.marker_radius,
        markers: markers(
            s.catalog.countries(),
            state.globe.marker_radius,
            s.selected_country.as_deref(),
        ),
    })
}

async fn get_stations(
    State(state): State<HttpState>,
    Query(query): Query<StationsQuery>,
) -> Json<ApiStations> {
    let s = state.state_manager.get_state().await;
    let country = query
        .country
        .filter(|c| !c.is_empty())
        .or(s.selected_country);
    let stations = s
        .catalog
        .stations(country.as_deref(), &query.q)
        .iter()
        .map(StationInfo::from)
        .collect();
    let title = match &country {
        Some(c) => format!("{} Stations", c),
        None => "Global Radio".to_string(),
    };
    Json(ApiStations {
        title,
        country,
        stations,
    })
}

async fn select_country(State(state): State<HttpState>, Path(name): Path<String>) -> Response {
    info!("HTTP API: Select country {}", name);
    dispatch(&state, Command::SelectCountry { country: name }).await
}

async fn clear_country(State(state): State<HttpState>) -> Response {
    info!("HTTP API: Clear country");
    dispatch(&state, Command::ClearCountry).await
}

async fn select_station(State(state): State<HttpState>, Path(id): Path<String>) -> Response {
    info!("HTTP API: Select station {}", id);
    dispatch(&state, Command::SelectStation { id }).await
}

async fn play(State(state): State<HttpState>) -> Response {
    info!("HTTP API: Play");
    dispatch(&state, Command::Play).await
}

async fn pause(State(state): State<HttpState>) -> Response {
    info!("HTTP API: Pause");
    dispatch(&state, Command::Pause).await
}

async fn stop(State(state): State<HttpState>) -> Response {
    info!("HTTP API: Stop");
    dispatch(&state, Command::Stop).await
}

async fn set_volume(State(state): State<HttpState>, Path(volume): Path<i32>) -> Response {
    info!("HTTP API: Set volume to {}%", volume);
    let value = volume as f32 / 100.0;
    dispatch(&state, Command::Volume { value }).await
}

async fn refresh(State(state): State<HttpState>) -> Response {
    info!("HTTP API: Refresh directory");
    dispatch(&state, Command::Refresh).await
}

async fn events(State(state): State<HttpState>) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    debug!("HTTP API: SSE subscriber connected");
    let rx = state.broadcast_tx.subscribe();
    Sse::new(event_stream(rx, state.state_manager.clone())).keep_alive(KeepAlive::default())
}

/// `state` events carry the new revision, `log` events a formatted log line.
fn event_stream(
    rx: broadcast::Receiver<BroadcastMessage>,
    state_manager: Arc<StateManager>,
) -> impl Stream<Item = Result<Event, Infallible>> {
    stream::unfold((rx, state_manager), |(mut rx, state_manager)| async move {
        loop {
            let event = match rx.recv().await {
                Ok(BroadcastMessage::StateUpdated) => {
                    let rev = state_manager.rev().await;
                    Event::default().event("state").data(rev.to_string())
                }
                Ok(BroadcastMessage::Log(line)) => Event::default().event("log").data(line),
                Err(RecvError::Lagged(n)) => {
                    debug!("HTTP API: SSE subscriber lagged by {} messages", n);
                    continue;
                }
                Err(RecvError::Closed) => return None,
            };
            return Some((Ok(event), (rx, state_manager)));
        }
    })
}
