//! Pipeline supervisor tying together source acquisition, the transform
//! chain, encoding, and the frame store.
//!
//! One producer loop runs at the capture cadence, independent of every
//! viewer's display rate. A watchdog restarts the pipeline when a stage
//! stalls; a disconnected source is replaced by an explicit "no signal"
//! placeholder while reconnection is attempted.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Once};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Result;
use scope_ingest::{DeviceSource, Frame, FrameSource, SourceError, WifiSource};
use tracing::{debug, error, info, warn};

use crate::config::{SourceSelect, ViewerConfig};
use crate::encoding;
use crate::processing;
use crate::settings::{
    snapshot_settings, snapshot_tuning, CaptureTuning, ProcessingSettings, SharedSettings,
    SharedTuning,
};
use crate::stabilize::Stabilizer;
use crate::store::FrameStore;
use crate::telemetry;
use crate::watchdog::{spawn_watchdog, HealthComponent, PipelineHealth, WatchdogState};

const RESTART_BACKOFF: Duration = Duration::from_secs(1);
const RECONNECT_BACKOFF: Duration = Duration::from_secs(1);
const PACING_NAP: Duration = Duration::from_millis(10);
const PROBE_TIMEOUT: Duration = Duration::from_millis(1500);
// Placeholder geometry before the first real frame tells us better.
const PLACEHOLDER_DIMS: (u32, u32) = (1280, 720);

/// Run the viewer pipeline, automatically restarting on recoverable faults.
pub fn run(config: ViewerConfig) -> Result<()> {
    telemetry::init_tracing(config.verbose);

    static CTRL_HANDLER: Once = Once::new();
    let shutdown = Arc::new(AtomicBool::new(false));
    let handler_shutdown = shutdown.clone();
    CTRL_HANDLER.call_once(move || {
        if let Err(err) = ctrlc::set_handler({
            let handler_shutdown = handler_shutdown.clone();
            move || {
                handler_shutdown.store(true, Ordering::SeqCst);
            }
        }) {
            warn!("Failed to install Ctrl+C handler: {err}");
        }
    });

    let mut attempt: u32 = 0;
    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }

        match run_pipeline_once(&config, shutdown.clone()) {
            Ok(PipelineOutcome::Graceful) => break,
            Ok(PipelineOutcome::Restart(reason)) => {
                attempt = attempt.saturating_add(1);
                warn!("Pipeline restart requested (reason: {reason}), attempt #{attempt}");
                thread::sleep(RESTART_BACKOFF);
            }
            Err(err) => {
                error!("Viewer pipeline error: {err:?}");
                if shutdown.load(Ordering::SeqCst) {
                    break;
                }
                attempt = attempt.saturating_add(1);
                thread::sleep(RESTART_BACKOFF);
            }
        }
    }

    Ok(())
}

/// Result of a single pipeline run attempt.
enum PipelineOutcome {
    Graceful,
    Restart(&'static str),
}

fn run_pipeline_once(config: &ViewerConfig, shutdown: Arc<AtomicBool>) -> Result<PipelineOutcome> {
    if shutdown.load(Ordering::SeqCst) {
        return Ok(PipelineOutcome::Graceful);
    }
    let _ = telemetry::init_metrics_recorder();

    let settings: SharedSettings = Arc::new(Mutex::new(ProcessingSettings::default()));
    let tuning: SharedTuning = Arc::new(Mutex::new(CaptureTuning {
        fps: config.capture_fps,
        jpeg_quality: config.jpeg_quality,
    }));
    let store = Arc::new(FrameStore::new());
    let pipeline_running = Arc::new(AtomicBool::new(true));

    let health = Arc::new(PipelineHealth::new());
    let watchdog_state = Arc::new(WatchdogState::new());
    let watchdog_handle = spawn_watchdog(
        health.clone(),
        pipeline_running.clone(),
        shutdown.clone(),
        watchdog_state.clone(),
    );

    let server = crate::server::spawn_server(
        store.clone(),
        settings.clone(),
        tuning.clone(),
        pipeline_running.clone(),
        config.http_port,
    )?;
    info!(
        "Web viewer running at http://localhost:{}/ (stream: /stream.mjpg, snapshot: /current.jpg)",
        config.http_port
    );

    let mut source: Option<Box<dyn FrameSource>> = None;
    let mut stabilizer = Stabilizer::new();
    let mut frame_number: u64 = 0;
    let mut smoothed_fps: f32 = 0.0;
    let mut last_instant = Instant::now();
    let mut last_capture: Option<Instant> = None;
    let mut last_revision: u64 = 0;
    let mut placeholder_published = false;
    let mut placeholder_dims = PLACEHOLDER_DIMS;

    while pipeline_running.load(Ordering::Relaxed) {
        if shutdown.load(Ordering::Relaxed) {
            pipeline_running.store(false, Ordering::SeqCst);
            break;
        }
        health.beat(HealthComponent::Capture);

        let tuning_snapshot = snapshot_tuning(&tuning);

        if source.is_none() {
            match open_source(config) {
                Ok(opened) => {
                    info!("Capturing from {}", opened.describe());
                    source = Some(opened);
                }
                Err(err) => {
                    warn!("Source open failed: {err}");
                    if !placeholder_published {
                        publish_placeholder(&store, tuning_snapshot.jpeg_quality, placeholder_dims);
                        placeholder_published = true;
                    }
                    health.beat(HealthComponent::Encoder);
                    sleep_responsive(RECONNECT_BACKOFF, &shutdown);
                    continue;
                }
            }
        }

        // Pace to the capture cadence; nap in small slices so shutdown and
        // cadence changes stay responsive.
        let period = Duration::from_secs_f64(1.0 / f64::from(tuning_snapshot.fps.max(1)));
        if let Some(last) = last_capture {
            let elapsed = last.elapsed();
            if elapsed < period {
                thread::sleep((period - elapsed).min(PACING_NAP));
                continue;
            }
        }

        let active = match source.as_mut() {
            Some(active) => active,
            None => continue,
        };
        let frame = match active.next_frame() {
            Ok(Some(frame)) => frame,
            Ok(None) => continue,
            Err(err) => {
                match &err {
                    SourceError::Disconnected { reason } => {
                        warn!("Source disconnected: {reason}")
                    }
                    other => warn!("Source fault: {other}"),
                }
                metrics::counter!("scope_source_disconnects_total").increment(1);
                source = None;
                stabilizer.reset();
                if !placeholder_published {
                    publish_placeholder(&store, tuning_snapshot.jpeg_quality, placeholder_dims);
                    placeholder_published = true;
                }
                health.beat(HealthComponent::Encoder);
                continue;
            }
        };
        last_capture = Some(Instant::now());
        placeholder_published = false;
        placeholder_dims = (frame.width, frame.height);
        frame_number = frame_number.wrapping_add(1);

        let now = Instant::now();
        let elapsed = now.duration_since(last_instant).as_secs_f32();
        last_instant = now;
        if elapsed > 0.0 {
            let instant_fps = 1.0 / elapsed;
            smoothed_fps = if smoothed_fps == 0.0 {
                instant_fps
            } else {
                0.9 * smoothed_fps + 0.1 * instant_fps
            };
            metrics::histogram!("scope_capture_frame_interval_seconds")
                .record(f64::from(elapsed));
        }
        metrics::gauge!("scope_pipeline_fps").set(f64::from(smoothed_fps));

        if frame_number % 30 == 0 {
            debug!(
                "Capture heartbeat: frame #{frame_number}, {smoothed_fps:.1} fps, {}x{}",
                frame.width, frame.height
            );
        }

        let settings_snapshot = snapshot_settings(&settings);
        if settings_snapshot.revision != last_revision {
            debug!("Settings changed (revision {})", settings_snapshot.revision);
            last_revision = settings_snapshot.revision;
        }

        let process_started = Instant::now();
        let processed = processing::process(frame, &settings_snapshot, &mut stabilizer);
        metrics::histogram!("scope_stage_latency_seconds", "stage" => "process")
            .record(process_started.elapsed().as_secs_f64());

        let encode_started = Instant::now();
        match encoding::encode_jpeg(&processed, tuning_snapshot.jpeg_quality) {
            Ok(jpeg) => {
                store.publish(jpeg);
                metrics::counter!("scope_frames_published_total").increment(1);
            }
            Err(err) => {
                warn!("JPEG encode failed, skipping publish: {err}");
                metrics::counter!("scope_encode_failures_total").increment(1);
            }
        }
        metrics::histogram!("scope_stage_latency_seconds", "stage" => "encode")
            .record(encode_started.elapsed().as_secs_f64());
        health.beat(HealthComponent::Encoder);
    }

    debug!("Stopping viewer pipeline");
    pipeline_running.store(false, Ordering::SeqCst);
    // Dropping a WiFi source sends the camera its stop command.
    drop(source);
    server.stop();
    let _ = watchdog_handle.join();

    if watchdog_state.is_triggered() {
        let reason = watchdog_state
            .reason()
            .map(|component| component.label())
            .unwrap_or("watchdog");
        return Ok(PipelineOutcome::Restart(reason));
    }

    Ok(PipelineOutcome::Graceful)
}

fn open_source(config: &ViewerConfig) -> Result<Box<dyn FrameSource>, SourceError> {
    match config.source {
        SourceSelect::Wifi => {
            let source = WifiSource::open(config.host, config.wifi_timeout)?;
            Ok(Box::new(source))
        }
        SourceSelect::Device => {
            let source = DeviceSource::open()?;
            Ok(Box::new(source))
        }
        SourceSelect::Auto => {
            if scope_ingest::probe(config.host, PROBE_TIMEOUT) {
                info!("WiFi microscope detected at {}", config.host);
                let source = WifiSource::open(config.host, config.wifi_timeout)?;
                Ok(Box::new(source))
            } else {
                debug!("WiFi microscope not reachable, trying local capture device");
                let source = DeviceSource::open()?;
                Ok(Box::new(source))
            }
        }
    }
}

fn publish_placeholder(store: &FrameStore, quality: u8, dims: (u32, u32)) {
    let placeholder = Frame::no_signal(dims.0, dims.1);
    match encoding::encode_jpeg(&placeholder, quality) {
        Ok(jpeg) => {
            store.publish(jpeg);
            debug!("Published no-signal placeholder ({}x{})", dims.0, dims.1);
        }
        Err(err) => warn!("Failed to encode placeholder frame: {err}"),
    }
}

fn sleep_responsive(total: Duration, shutdown: &AtomicBool) {
    let deadline = Instant::now() + total;
    while Instant::now() < deadline && !shutdown.load(Ordering::Relaxed) {
        thread::sleep(Duration::from_millis(50));
    }
}
