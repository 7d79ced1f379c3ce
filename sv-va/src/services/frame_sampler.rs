//! Frame sampling stage
//!
//! Probes the source with `ffprobe`, then streams raw RGB frames out
//! of `ffmpeg` and keeps every Nth one so the saved frames approximate
//! the configured target rate. Sampled frames are JPEG-encoded into
//! the frame store and committed to the database in small batches, so
//! an interrupted run loses at most one batch.

use image::codecs::jpeg::JpegEncoder;
use image::RgbImage;
use serde::Deserialize;
use sqlx::SqlitePool;
use std::io::Read;
use std::path::Path;
use std::process::{Child, ChildStdout, Command, Stdio};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::db;
use crate::error::PipelineError;
use crate::models::{FrameRecord, PipelineStage, VideoMetadata};
use crate::services::orchestrator::ProgressReporter;
use crate::storage::FrameStore;

/// Frames per database commit
const COMMIT_INTERVAL: usize = 10;

/// JPEG quality for persisted frames
const JPEG_QUALITY: u8 = 85;

/// Longest the persister waits for the decoder to produce a frame
const DECODE_STALL_TIMEOUT: Duration = Duration::from_secs(60);

/// Keyframe heuristic thresholds: high contrast, neither crushed nor
/// blown out
const KEYFRAME_MIN_STDDEV: f64 = 50.0;
const KEYFRAME_LUMA_RANGE: (f64, f64) = (50.0, 200.0);

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
    format: Option<ProbeFormat>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    codec_type: Option<String>,
    r_frame_rate: Option<String>,
    avg_frame_rate: Option<String>,
    nb_frames: Option<String>,
    width: Option<i64>,
    height: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct ProbeFormat {
    duration: Option<String>,
    size: Option<String>,
}

/// Probe result used to drive decoding
#[derive(Debug, Clone)]
pub struct ProbedVideo {
    pub fps: f64,
    pub width: u32,
    pub height: u32,
    /// Best-effort total source frame count (exact when the container
    /// reports it, estimated from duration otherwise)
    pub total_frames: u64,
    pub metadata: VideoMetadata,
}

/// Parse an ffprobe rational frame rate like `30000/1001`
pub fn parse_frame_rate(rate: &str) -> Option<f64> {
    match rate.split_once('/') {
        Some((num, den)) => {
            let num: f64 = num.trim().parse().ok()?;
            let den: f64 = den.trim().parse().ok()?;
            if den == 0.0 || num <= 0.0 {
                None
            } else {
                Some(num / den)
            }
        }
        None => rate.trim().parse().ok().filter(|fps: &f64| *fps > 0.0),
    }
}

/// Source frames kept between samples: every Nth source frame is
/// persisted, N = floor(source_fps / target_fps), at least 1
pub fn sample_interval(source_fps: f64, target_fps: f64) -> u64 {
    ((source_fps / target_fps).floor() as u64).max(1)
}

/// Mean and standard deviation of pixel luma over an RGB24 buffer
pub fn luma_stats(rgb: &[u8]) -> (f64, f64) {
    let pixels = rgb.len() / 3;
    if pixels == 0 {
        return (0.0, 0.0);
    }

    let mut sum = 0.0;
    let mut sum_sq = 0.0;
    for px in rgb.chunks_exact(3) {
        let luma = 0.299 * px[0] as f64 + 0.587 * px[1] as f64 + 0.114 * px[2] as f64;
        sum += luma;
        sum_sq += luma * luma;
    }

    let mean = sum / pixels as f64;
    let variance = (sum_sq / pixels as f64 - mean * mean).max(0.0);
    (mean, variance.sqrt())
}

/// Keyframe heuristic: strong contrast and sane exposure
pub fn is_keyframe(luma_mean: f64, luma_stddev: f64) -> bool {
    luma_stddev > KEYFRAME_MIN_STDDEV
        && luma_mean > KEYFRAME_LUMA_RANGE.0
        && luma_mean < KEYFRAME_LUMA_RANGE.1
}

/// Probe source metadata with ffprobe
///
/// Any failure here is fatal for the run and happens before a single
/// frame row exists.
pub async fn probe_video(path: &Path, timeout_secs: u64) -> Result<ProbedVideo, PipelineError> {
    if !path.exists() {
        return Err(PipelineError::SourceUnreadable(format!(
            "file not found: {}",
            path.display()
        )));
    }

    let output = tokio::time::timeout(
        Duration::from_secs(timeout_secs),
        tokio::process::Command::new("ffprobe")
            .args([
                "-v",
                "quiet",
                "-print_format",
                "json",
                "-show_format",
                "-show_streams",
            ])
            .arg(path)
            .output(),
    )
    .await
    .map_err(|_| PipelineError::SourceUnreadable(format!("ffprobe timed out after {}s", timeout_secs)))?
    .map_err(|e| PipelineError::SourceUnreadable(format!("ffprobe failed to start: {}", e)))?;

    if !output.status.success() {
        return Err(PipelineError::SourceUnreadable(format!(
            "ffprobe exited with {}",
            output.status
        )));
    }

    let probe: ProbeOutput = serde_json::from_slice(&output.stdout)
        .map_err(|e| PipelineError::SourceUnreadable(format!("unparseable ffprobe output: {}", e)))?;

    let stream = probe
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("video"))
        .ok_or_else(|| PipelineError::SourceUnreadable("no video stream".to_string()))?;

    let fps = stream
        .avg_frame_rate
        .as_deref()
        .and_then(parse_frame_rate)
        .or_else(|| stream.r_frame_rate.as_deref().and_then(parse_frame_rate))
        .ok_or_else(|| PipelineError::SourceUnreadable("no usable frame rate".to_string()))?;

    let (width, height) = match (stream.width, stream.height) {
        (Some(w), Some(h)) if w > 0 && h > 0 => (w as u32, h as u32),
        _ => {
            return Err(PipelineError::SourceUnreadable(
                "missing video dimensions".to_string(),
            ))
        }
    };

    let duration: Option<f64> = probe
        .format
        .as_ref()
        .and_then(|f| f.duration.as_deref())
        .and_then(|d| d.parse().ok());
    let size_bytes: Option<i64> = probe
        .format
        .as_ref()
        .and_then(|f| f.size.as_deref())
        .and_then(|s| s.parse().ok());

    let total_frames = stream
        .nb_frames
        .as_deref()
        .and_then(|n| n.parse::<u64>().ok())
        .or_else(|| duration.map(|d| (d * fps).round() as u64))
        .unwrap_or(0);

    Ok(ProbedVideo {
        fps,
        width,
        height,
        total_frames,
        metadata: VideoMetadata {
            duration_seconds: duration,
            fps: Some(fps),
            size_bytes,
            width: Some(width as i64),
            height: Some(height as i64),
        },
    })
}

struct SampledFrame {
    /// Sequential sampled index, from 0
    index: i64,
    /// Position in the source stream
    source_index: u64,
    timestamp_ms: i64,
    jpeg: Vec<u8>,
    is_keyframe: bool,
}

/// Spawn the ffmpeg decode child, handing back its stdout separately
/// so the reader and the process handle can live on different threads
fn spawn_ffmpeg(path: &Path) -> Result<(Child, ChildStdout), PipelineError> {
    let mut child = Command::new("ffmpeg")
        .arg("-i")
        .arg(path)
        .args(["-f", "rawvideo", "-pix_fmt", "rgb24", "-"])
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .stdin(Stdio::null())
        .spawn()
        .map_err(|e| PipelineError::SourceUnreadable(format!("ffmpeg failed to start: {}", e)))?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| PipelineError::SourceUnreadable("ffmpeg produced no output".to_string()))?;

    Ok((child, stdout))
}

/// Kill the decode child, which also unblocks any reader parked on its
/// stdout
fn kill_child(child: &Arc<Mutex<Child>>) {
    if let Ok(mut guard) = child.lock() {
        let _ = guard.kill();
    }
}

/// Decode on a blocking thread, keeping every `interval`th frame
fn decode_frames(
    mut stdout: ChildStdout,
    child: Arc<Mutex<Child>>,
    probed: &ProbedVideo,
    interval: u64,
    tx: mpsc::Sender<SampledFrame>,
) -> Result<(), PipelineError> {
    let frame_bytes = probed.width as usize * probed.height as usize * 3;
    let mut buffer = vec![0u8; frame_bytes];
    let mut source_index: u64 = 0;
    let mut sampled_index: i64 = 0;

    loop {
        match stdout.read_exact(&mut buffer) {
            Ok(()) => {}
            // Clean end of stream between frames
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(e) => {
                kill_child(&child);
                return Err(PipelineError::SourceUnreadable(format!(
                    "ffmpeg stream read failed: {}",
                    e
                )));
            }
        }

        if source_index % interval == 0 {
            let (mean, stddev) = luma_stats(&buffer);

            let img = RgbImage::from_raw(probed.width, probed.height, buffer.clone())
                .ok_or_else(|| {
                    PipelineError::SourceUnreadable("frame buffer size mismatch".to_string())
                })?;
            let mut jpeg = Vec::new();
            JpegEncoder::new_with_quality(&mut jpeg, JPEG_QUALITY)
                .encode_image(&img)
                .map_err(|e| {
                    PipelineError::SourceUnreadable(format!("JPEG encode failed: {}", e))
                })?;

            let timestamp_ms = (source_index as f64 / probed.fps * 1000.0).round() as i64;
            let frame = SampledFrame {
                index: sampled_index,
                source_index,
                timestamp_ms,
                jpeg,
                is_keyframe: is_keyframe(mean, stddev),
            };
            sampled_index += 1;

            // Receiver dropped means the persister bailed; stop decoding
            if tx.blocking_send(frame).is_err() {
                kill_child(&child);
                return Ok(());
            }
        }

        source_index += 1;
    }

    let status = child
        .lock()
        .map_err(|_| PipelineError::SourceUnreadable("decoder handle poisoned".to_string()))?
        .wait()
        .map_err(|e| PipelineError::SourceUnreadable(format!("ffmpeg wait failed: {}", e)))?;
    if !status.success() && source_index == 0 {
        return Err(PipelineError::SourceUnreadable(format!(
            "ffmpeg exited with {} before producing frames",
            status
        )));
    }

    Ok(())
}

/// Outcome of the sampling stage
pub struct SamplerOutcome {
    pub frame_count: i64,
    pub metadata: VideoMetadata,
}

/// Run the sampling stage for one session
pub async fn sample_video(
    pool: &SqlitePool,
    store: &FrameStore,
    session_id: Uuid,
    video_path: &Path,
    target_fps: f64,
    probe_timeout_secs: u64,
    reporter: &ProgressReporter,
) -> Result<SamplerOutcome, PipelineError> {
    let probed = probe_video(video_path, probe_timeout_secs).await?;
    let interval = sample_interval(probed.fps, target_fps);

    tracing::info!(
        "Sampling {}: {:.2} fps source, keeping every {} frames",
        video_path.display(),
        probed.fps,
        interval
    );

    let (tx, mut rx) = mpsc::channel::<SampledFrame>(COMMIT_INTERVAL);
    let (child, stdout) = spawn_ffmpeg(video_path)?;
    let child = Arc::new(Mutex::new(child));
    let decode_child = child.clone();
    let decode_probed = probed.clone();
    let decoder = tokio::task::spawn_blocking(move || {
        decode_frames(stdout, decode_child, &decode_probed, interval, tx)
    });

    let total_source_frames = probed.total_frames.max(1);
    let mut pending: Vec<FrameRecord> = Vec::with_capacity(COMMIT_INTERVAL);
    let mut frame_count: i64 = 0;

    loop {
        let frame = match tokio::time::timeout(DECODE_STALL_TIMEOUT, rx.recv()).await {
            Ok(Some(frame)) => frame,
            Ok(None) => break,
            Err(_) => {
                // Unblocks the decoder thread's read and reaps the
                // child; without this a stalled ffmpeg would outlive
                // the failed run.
                kill_child(&child);
                return Err(PipelineError::SourceUnreadable(
                    "decoder stalled".to_string(),
                ));
            }
        };

        let image_path = store.save_frame_jpeg(session_id, frame.index, &frame.jpeg)?;
        let mut record = FrameRecord::new(
            session_id,
            frame.index,
            frame.timestamp_ms,
            image_path.display().to_string(),
            frame.is_keyframe,
        );
        record.analyzed = false;
        pending.push(record);
        frame_count += 1;

        if pending.len() >= COMMIT_INTERVAL {
            db::frames::insert_frames(pool, &pending).await?;
            pending.clear();

            let fraction = frame.source_index as f64 / total_source_frames as f64;
            reporter
                .report(
                    PipelineStage::Sampling,
                    fraction,
                    format!("Sampled {} frames", frame_count),
                )
                .await;
        }
    }

    if !pending.is_empty() {
        db::frames::insert_frames(pool, &pending).await?;
    }

    // Surface decoder errors after draining so partial batches are kept
    decoder
        .await
        .map_err(|e| PipelineError::SourceUnreadable(format!("decoder panicked: {}", e)))??;

    reporter
        .report(
            PipelineStage::Sampling,
            1.0,
            format!("Sampling complete: {} frames", frame_count),
        )
        .await;

    Ok(SamplerOutcome {
        frame_count,
        metadata: probed.metadata,
    })
}
