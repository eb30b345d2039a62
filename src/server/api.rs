//! REST API implementation using rouille.
//!
//! GET endpoints read `SharedApiState` snapshots and the thread-safe
//! `FrameService`. POST endpoints never touch playback state directly: they
//! send an `ApiCommand` to the tick loop, which applies it to the scheduler.
//! CORS headers are added to all responses for browser access.

use rouille::{Request, Response};
use serde::Serialize;
use std::sync::{Arc, RwLock, mpsc};
use std::thread;

use crate::core::frame_cache::CacheStatsSnapshot;
use crate::core::scheduler::{PlaybackState, TrackSnapshot};
use crate::core::service::FrameService;
use crate::entities::{EntityId, FrameRecord, FrameView, ViewRequest};
use crate::error::EngineError;

/// Longest range `/api/frames` will build in one request
const MAX_RANGE: i32 = 1000;

/// Commands sent from API handlers to the tick loop
#[derive(Debug, Clone, PartialEq)]
pub enum ApiCommand {
    Play,
    Pause,
    /// Pause + time 0
    Stop,
    ToggleLoop,
    /// Seek to virtual time (ms)
    Seek(f64),
    SetSpeed(f64),
    /// One frame; sign gives direction
    Step(i32),
}

/// Full status response
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub entity: EntityId,
    pub player: PlaybackState,
    pub tracks: Vec<TrackSnapshot>,
    pub cache: CacheStatsSnapshot,
}

/// State readable by API handlers. Snapshots are written by the tick loop.
pub struct SharedApiState {
    pub entity: EntityId,
    pub service: Arc<FrameService>,
    pub player: RwLock<PlaybackState>,
    pub tracks: RwLock<Vec<TrackSnapshot>>,
}

impl SharedApiState {
    pub fn new(entity: EntityId, service: Arc<FrameService>, player: PlaybackState) -> Self {
        Self {
            entity,
            service,
            player: RwLock::new(player),
            tracks: RwLock::new(Vec::new()),
        }
    }

    /// Publish the latest playback snapshot
    pub fn update(&self, player: PlaybackState, tracks: Vec<TrackSnapshot>) {
        *self.player.write().unwrap_or_else(|e| e.into_inner()) = player;
        *self.tracks.write().unwrap_or_else(|e| e.into_inner()) = tracks;
    }

    pub fn player(&self) -> PlaybackState {
        *self.player.read().unwrap_or_else(|e| e.into_inner())
    }

    pub fn status(&self) -> StatusResponse {
        StatusResponse {
            entity: self.entity,
            player: self.player(),
            tracks: self.tracks.read().unwrap_or_else(|e| e.into_inner()).clone(),
            cache: self.service.cache_stats(),
        }
    }
}

/// `/api/view/{n}` body. Image payloads are served by `/api/image/{n}/{variant}`.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct FrameViewResponse<'a> {
    frame_index: i32,
    shape: &'static str,
    original_bytes: usize,
    original_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    overlay_bytes: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    overlay_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    mesh: Option<&'a FrameRecord>,
}

impl<'a> FrameViewResponse<'a> {
    fn new(view: &'a FrameView) -> Self {
        let n = view.frame_index();
        Self {
            frame_index: n,
            shape: view.shape(),
            original_bytes: view.original().len(),
            original_url: format!("/api/image/{}/original", n),
            overlay_bytes: view.overlay().map(|b| b.len()),
            overlay_url: view.overlay().map(|_| format!("/api/image/{}/overlay", n)),
            mesh: view.mesh().map(|m| m.as_ref()),
        }
    }
}

/// Content type from the image signature
fn image_mime(bytes: &[u8]) -> &'static str {
    if bytes.starts_with(b"\x89PNG\r\n\x1a\n") {
        "image/png"
    } else if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        "image/jpeg"
    } else {
        "application/octet-stream"
    }
}

/// Generic API response
#[derive(Serialize)]
struct ApiResponse {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl ApiResponse {
    fn ok() -> Self {
        Self { success: true, message: None, error: None }
    }

    fn ok_msg(msg: &str) -> Self {
        Self { success: true, message: Some(msg.to_string()), error: None }
    }

    fn err(msg: &str) -> Self {
        Self { success: false, message: None, error: Some(msg.to_string()) }
    }
}

fn bad_request(msg: &str) -> Response {
    Response::json(&ApiResponse::err(msg)).with_status_code(400)
}

fn not_found(msg: &str) -> Response {
    Response::json(&ApiResponse::err(msg)).with_status_code(404)
}

/// Map engine errors to HTTP statuses
fn engine_error(e: &EngineError) -> Response {
    match e {
        EngineError::FrameOutOfRange { .. } => bad_request(&e.to_string()),
        EngineError::UnknownEntity(_) | EngineError::UnknownTrack(_) => not_found(&e.to_string()),
        EngineError::NotInitialized => Response::json(&ApiResponse::err(&e.to_string())).with_status_code(503),
        _ => Response::json(&ApiResponse::err(&e.to_string())).with_status_code(500),
    }
}

/// REST API server
pub struct ApiServer {
    port: u16,
    state: Arc<SharedApiState>,
    command_tx: mpsc::Sender<ApiCommand>,
}

impl ApiServer {
    /// Start the API server in a background thread.
    /// Returns the command receiver for the tick loop to poll.
    pub fn start(port: u16, state: Arc<SharedApiState>) -> mpsc::Receiver<ApiCommand> {
        let (tx, rx) = mpsc::channel();
        let server = ApiServer {
            port,
            state,
            command_tx: tx,
        };
        thread::Builder::new()
            .name("posesync-api".into())
            .spawn(move || server.run())
            .map_err(|e| log::error!("Failed to spawn API server thread: {}", e))
            .ok();
        rx
    }

    fn run(self) {
        let addr = format!("0.0.0.0:{}", self.port);
        log::info!("API server starting on http://{}", addr);

        let state = self.state;
        let tx = self.command_tx;
        rouille::start_server(&addr, move |request| Self::handle_request(request, &state, &tx));
    }

    pub fn handle_request(request: &Request, state: &SharedApiState, tx: &mpsc::Sender<ApiCommand>) -> Response {
        // Preflight
        if request.method() == "OPTIONS" {
            return Response::empty_204()
                .with_additional_header("Access-Control-Allow-Origin", "*")
                .with_additional_header("Access-Control-Allow-Methods", "GET, POST, OPTIONS")
                .with_additional_header("Access-Control-Allow-Headers", "Content-Type");
        }

        let response = Self::route(request, state, tx);
        response.with_additional_header("Access-Control-Allow-Origin", "*")
    }

    fn route(request: &Request, state: &SharedApiState, tx: &mpsc::Sender<ApiCommand>) -> Response {
        // Paths with parameters are matched by prefix
        let path = request.url();
        match request.method() {
            "GET" => {
                if let Some(n) = path.strip_prefix("/api/frame/") {
                    return match n.parse::<i32>() {
                        Ok(frame) => Self::get_frame(state, frame),
                        Err(_) => bad_request("Invalid frame number"),
                    };
                }
                if let Some(n) = path.strip_prefix("/api/view/") {
                    return match n.parse::<i32>() {
                        Ok(frame) => Self::get_view(request, state, frame),
                        Err(_) => bad_request("Invalid frame number"),
                    };
                }
                if let Some(rest) = path.strip_prefix("/api/image/") {
                    let Some((n, variant)) = rest.split_once('/') else {
                        return not_found("Not found");
                    };
                    let Ok(frame) = n.parse::<i32>() else {
                        return bad_request("Invalid frame number");
                    };
                    return match variant {
                        "original" | "overlay" => Self::get_image(state, frame, variant == "overlay"),
                        _ => not_found("Unknown image variant"),
                    };
                }
            }
            "POST" => {
                if let Some(ms) = path.strip_prefix("/api/player/seek/") {
                    return match ms.parse::<f64>() {
                        Ok(ms) if ms.is_finite() => Self::send_command(tx, ApiCommand::Seek(ms)),
                        _ => bad_request("Invalid time"),
                    };
                }
                if let Some(s) = path.strip_prefix("/api/player/speed/") {
                    return match s.parse::<f64>() {
                        Ok(speed) if speed.is_finite() => Self::send_command(tx, ApiCommand::SetSpeed(speed)),
                        _ => bad_request("Invalid speed"),
                    };
                }
                if let Some(d) = path.strip_prefix("/api/player/step/") {
                    return match d.trim_start_matches('+').parse::<i32>() {
                        Ok(dir) if dir != 0 => Self::send_command(tx, ApiCommand::Step(dir.signum())),
                        _ => bad_request("Invalid step direction"),
                    };
                }
            }
            _ => {}
        }

        rouille::router!(request,
            (GET) ["/api/health"] => {
                Response::json(&ApiResponse::ok_msg("posesync API server"))
            },
            (GET) ["/api/status"] => {
                Response::json(&state.status())
            },
            (GET) ["/api/stats"] => {
                match state.service.statistics(state.entity) {
                    Ok(stats) => Response::json(&stats),
                    Err(e) => engine_error(&e),
                }
            },
            (GET) ["/api/gaps"] => {
                match state.service.gap_map(state.entity) {
                    Ok(map) => Response::json(map.as_ref()),
                    Err(e) => engine_error(&e),
                }
            },
            (GET) ["/api/frames"] => {
                Self::get_frames(request, state)
            },

            // Player control
            (POST) ["/api/player/play"] => {
                Self::send_command(tx, ApiCommand::Play)
            },
            (POST) ["/api/player/pause"] => {
                Self::send_command(tx, ApiCommand::Pause)
            },
            (POST) ["/api/player/stop"] => {
                Self::send_command(tx, ApiCommand::Stop)
            },
            (POST) ["/api/player/toggle-loop"] => {
                Self::send_command(tx, ApiCommand::ToggleLoop)
            },

            _ => not_found("Not found")
        )
    }

    fn get_frame(state: &SharedApiState, frame: i32) -> Response {
        match state.service.get_frame(state.entity, frame) {
            Ok(Some(record)) => Response::json(record.as_ref()),
            Ok(None) => not_found("Frame has no data to interpolate from"),
            Err(e) => engine_error(&e),
        }
    }

    fn get_frames(request: &Request, state: &SharedApiState) -> Response {
        let parse = |name: &str| request.get_param(name).and_then(|v| v.parse::<i32>().ok());
        let (Some(start), Some(end)) = (parse("start"), parse("end")) else {
            return bad_request("start and end query parameters required");
        };
        if end < start || i64::from(end) - i64::from(start) > i64::from(MAX_RANGE) {
            return bad_request(&format!("Range must be ascending and at most {} frames", MAX_RANGE));
        }
        match state.service.get_frame_range(state.entity, start, end) {
            Ok(frames) => {
                let records: Vec<_> = frames.iter().map(|f| f.as_ref()).collect();
                Response::json(&records)
            }
            Err(e) => engine_error(&e),
        }
    }

    fn get_view(request: &Request, state: &SharedApiState, frame: i32) -> Response {
        let flag = |name: &str| request.get_param(name).is_some_and(|v| matches!(v.as_str(), "1" | "true"));
        let view_request = ViewRequest { overlay: flag("overlay"), mesh: flag("mesh") };
        match state.service.get_frame_view(state.entity, frame, view_request) {
            Ok(Some(view)) => Response::json(&FrameViewResponse::new(&view)),
            Ok(None) => not_found("No image for frame"),
            Err(e) => engine_error(&e),
        }
    }

    fn get_image(state: &SharedApiState, frame: i32, overlay: bool) -> Response {
        let view_request = ViewRequest { overlay, mesh: false };
        let view = match state.service.get_frame_view(state.entity, frame, view_request) {
            Ok(Some(view)) => view,
            Ok(None) => return not_found("No image for frame"),
            Err(e) => return engine_error(&e),
        };
        let bytes = if overlay { view.overlay() } else { Some(view.original()) };
        match bytes {
            Some(bytes) => Response::from_data(image_mime(bytes), bytes.to_vec()),
            None => not_found("No overlay for frame"),
        }
    }

    fn send_command(tx: &mpsc::Sender<ApiCommand>, cmd: ApiCommand) -> Response {
        match tx.send(cmd) {
            Ok(_) => Response::json(&ApiResponse::ok()),
            Err(e) => Response::json(&ApiResponse::err(&format!("Failed to send command: {}", e)))
                .with_status_code(500),
        }
    }
}
