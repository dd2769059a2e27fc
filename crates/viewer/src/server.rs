//! HTTP surface: the control page, the settings endpoints, and the MJPEG
//! fan-out.
//!
//! The server runs on a dedicated thread so the capture hot path never
//! touches the actix runtime. Each streaming session is an independent
//! generator that polls the frame store version and paces itself to its own
//! `?fps=` target; a slow or disconnecting client affects nobody else.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use actix_web::http::header;
use actix_web::web::{self, Bytes};
use actix_web::{App, HttpResponse, HttpServer};
use anyhow::{Context, Result};
use async_stream::stream;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tracing::error;

use crate::html::CONTROL_PAGE_HTML;
use crate::settings::{
    snapshot_settings, snapshot_tuning, CaptureTuning, ProcessingSettings, SettingsError,
    SharedSettings, SharedTuning,
};
use crate::store::FrameStore;
use crate::telemetry;

const MIN_STREAM_FPS: u32 = 1;
const MAX_STREAM_FPS: u32 = 29;
const DEFAULT_STREAM_FPS: u32 = 29;
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Shared state backing HTTP handlers.
pub(crate) struct ServerState {
    store: Arc<FrameStore>,
    settings: SharedSettings,
    tuning: SharedTuning,
    running: Arc<AtomicBool>,
}

#[derive(Default)]
/// Handle for the server thread.
pub(crate) struct ViewerServer {
    shutdown: Option<oneshot::Sender<()>>,
    handle: Option<std::thread::JoinHandle<()>>,
}

impl ViewerServer {
    /// Signal the server to stop and block until the thread exits.
    pub(crate) fn stop(self) {
        if let Some(tx) = self.shutdown {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle {
            let _ = handle.join();
        }
    }
}

/// Spawn the server thread and return a handle that can stop it.
pub(crate) fn spawn_server(
    store: Arc<FrameStore>,
    settings: SharedSettings,
    tuning: SharedTuning,
    running: Arc<AtomicBool>,
    port: u16,
) -> Result<ViewerServer> {
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let handle = telemetry::spawn_thread("viewer-http", move || {
        if let Err(err) = actix_web::rt::System::new().block_on(async move {
            let server = HttpServer::new(move || {
                App::new()
                    .app_data(web::Data::new(ServerState {
                        store: store.clone(),
                        settings: settings.clone(),
                        tuning: tuning.clone(),
                        running: running.clone(),
                    }))
                    .route("/", web::get().to(index_route))
                    .route("/stream.mjpg", web::get().to(stream_handler))
                    .route("/current.jpg", web::get().to(snapshot_handler))
                    .route("/settings", web::get().to(settings_handler))
                    .route("/metrics", web::get().to(metrics_handler))
                    .route("/process/{setting}", web::post().to(process_command))
                    .route("/process/{setting}/{value}", web::post().to(process_update))
                    .route("/capture/{setting}/{value}", web::post().to(capture_update))
            })
            .disable_signals()
            .bind(("0.0.0.0", port))?
            .run();

            let srv_handle = server.handle();
            actix_web::rt::spawn(async move {
                let _ = shutdown_rx.await;
                srv_handle.stop(true).await;
            });

            server.await
        }) {
            error!("HTTP server error: {err}");
        }
    })
    .context("Failed to spawn viewer server thread")?;
    Ok(ViewerServer {
        shutdown: Some(shutdown_tx),
        handle: Some(handle),
    })
}

/// Per-session send gate: admits a frame only when the store version moved
/// on and the session's minimum inter-send interval has elapsed.
pub struct StreamPacer {
    min_interval: Duration,
    last_version: u64,
    last_send: Option<Instant>,
}

impl StreamPacer {
    pub fn new(fps: u32) -> Self {
        Self {
            min_interval: Duration::from_secs_f64(1.0 / f64::from(fps.max(1))),
            last_version: 0,
            last_send: None,
        }
    }

    pub fn due(&mut self, version: u64, now: Instant) -> bool {
        if version == 0 || version == self.last_version {
            return false;
        }
        if let Some(last) = self.last_send {
            if now.duration_since(last) < self.min_interval {
                return false;
            }
        }
        self.last_version = version;
        self.last_send = Some(now);
        true
    }
}

/// One multipart segment: boundary, headers with an explicit length, payload,
/// trailing delimiter.
pub fn multipart_part(jpeg: &[u8]) -> Vec<u8> {
    let mut part = Vec::with_capacity(jpeg.len() + 96);
    part.extend_from_slice(b"--frame\r\n");
    part.extend_from_slice(b"Content-Type: image/jpeg\r\n");
    part.extend_from_slice(format!("Content-Length: {}\r\n\r\n", jpeg.len()).as_bytes());
    part.extend_from_slice(jpeg);
    part.extend_from_slice(b"\r\n");
    part
}

#[derive(Deserialize)]
struct StreamQuery {
    fps: Option<u32>,
}

#[derive(Serialize)]
struct SettingsSnapshot {
    processing: ProcessingSettings,
    capture: CaptureTuning,
}

async fn index_route() -> HttpResponse {
    HttpResponse::Ok()
        .content_type("text/html; charset=utf-8")
        .body(CONTROL_PAGE_HTML)
}

/// Stream the MJPEG feed at the session's own target rate.
async fn stream_handler(
    query: web::Query<StreamQuery>,
    state: web::Data<ServerState>,
) -> HttpResponse {
    let fps = query
        .fps
        .unwrap_or(DEFAULT_STREAM_FPS)
        .clamp(MIN_STREAM_FPS, MAX_STREAM_FPS);
    let store = state.store.clone();
    let running = state.running.clone();

    let stream = stream! {
        let mut pacer = StreamPacer::new(fps);
        let mut poll = actix_web::rt::time::interval(POLL_INTERVAL);
        loop {
            poll.tick().await;
            if !running.load(Ordering::Relaxed) {
                break;
            }
            if !pacer.due(store.version(), Instant::now()) {
                continue;
            }
            let Some(frame) = store.latest() else { continue };
            metrics::counter!("scope_stream_frames_sent_total").increment(1);
            yield Ok::<Bytes, actix_web::Error>(Bytes::from(multipart_part(&frame.jpeg)));
        }
    };

    HttpResponse::Ok()
        .insert_header((header::ACCESS_CONTROL_ALLOW_ORIGIN, "*"))
        .append_header(("Cache-Control", "no-cache, no-store, must-revalidate"))
        .append_header(("Content-Type", "multipart/x-mixed-replace; boundary=frame"))
        .streaming(stream)
}

/// Return the most recent encoded frame for screenshot use.
async fn snapshot_handler(state: web::Data<ServerState>) -> HttpResponse {
    match state.store.latest() {
        Some(frame) => HttpResponse::Ok()
            .content_type("image/jpeg")
            .append_header(("Cache-Control", "no-cache, no-store, must-revalidate"))
            .body(frame.jpeg),
        None => HttpResponse::NoContent().finish(),
    }
}

/// JSON snapshot of the current settings, for UI state sync.
async fn settings_handler(state: web::Data<ServerState>) -> HttpResponse {
    HttpResponse::Ok().json(SettingsSnapshot {
        processing: snapshot_settings(&state.settings),
        capture: snapshot_tuning(&state.tuning),
    })
}

async fn metrics_handler() -> HttpResponse {
    match telemetry::prometheus_handle() {
        Some(handle) => HttpResponse::Ok()
            .content_type("text/plain; version=0.0.4")
            .body(handle.render()),
        None => HttpResponse::ServiceUnavailable().finish(),
    }
}

/// Single-segment process commands: `reset` and `stab_reset`.
async fn process_command(path: web::Path<String>, state: web::Data<ServerState>) -> HttpResponse {
    let mut guard = match state.settings.lock() {
        Ok(guard) => guard,
        Err(err) => return HttpResponse::InternalServerError().body(err.to_string()),
    };
    match path.as_str() {
        "reset" => {
            guard.reset();
            ok_response()
        }
        "stab_reset" => {
            guard.reset_stabilizer();
            ok_response()
        }
        other => rejection_response(&SettingsError::UnknownSetting(other.to_string())),
    }
}

/// Mutate one processing setting.
async fn process_update(
    path: web::Path<(String, String)>,
    state: web::Data<ServerState>,
) -> HttpResponse {
    let (setting, value) = path.into_inner();
    let mut guard = match state.settings.lock() {
        Ok(guard) => guard,
        Err(err) => return HttpResponse::InternalServerError().body(err.to_string()),
    };
    match guard.apply(&setting, &value) {
        Ok(()) => ok_response(),
        Err(err) => rejection_response(&err),
    }
}

/// Mutate the capture cadence or encode quality.
async fn capture_update(
    path: web::Path<(String, String)>,
    state: web::Data<ServerState>,
) -> HttpResponse {
    let (setting, value) = path.into_inner();
    let mut guard = match state.tuning.lock() {
        Ok(guard) => guard,
        Err(err) => return HttpResponse::InternalServerError().body(err.to_string()),
    };
    match guard.apply(&setting, &value) {
        Ok(()) => ok_response(),
        Err(err) => rejection_response(&err),
    }
}

fn ok_response() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({ "status": "ok" }))
}

fn rejection_response(err: &SettingsError) -> HttpResponse {
    metrics::counter!("scope_settings_rejected_total").increment(1);
    HttpResponse::BadRequest().json(serde_json::json!({
        "status": "error",
        "error": err.to_string(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn multipart_part_frames_the_payload() {
        let part = multipart_part(&[0xFF, 0xD8, 0xFF, 0xD9]);
        let expected =
            b"--frame\r\nContent-Type: image/jpeg\r\nContent-Length: 4\r\n\r\n\xFF\xD8\xFF\xD9\r\n";
        assert_eq!(part, expected);
    }

    #[test]
    fn pacer_waits_for_the_first_publish() {
        let mut pacer = StreamPacer::new(29);
        assert!(!pacer.due(0, Instant::now()));
    }

    #[test]
    fn pacer_sends_each_version_once() {
        let mut pacer = StreamPacer::new(29);
        let now = Instant::now();
        assert!(pacer.due(1, now));
        assert!(!pacer.due(1, now + Duration::from_secs(1)));
        assert!(pacer.due(2, now + Duration::from_secs(2)));
    }

    #[test]
    fn pacer_decouples_session_rate_from_capture_rate() {
        // A 30 Hz producer against a 10 fps session over one second should
        // deliver close to ten frames, not thirty.
        let mut pacer = StreamPacer::new(10);
        let base = Instant::now();
        let mut version = 0u64;
        let mut sent = 0u32;
        for tick in 0u64..200 {
            let now = base + Duration::from_millis(tick * 5);
            if tick % 7 == 0 {
                version += 1;
            }
            if pacer.due(version, now) {
                sent += 1;
            }
        }
        assert!((9..=11).contains(&sent), "sent {sent} frames");
    }
}
