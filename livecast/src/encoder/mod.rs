//! FFmpeg encoder supervision.
//!
//! Spawns ffmpeg to transcode the per-stream ingest file(s) into an
//! adaptive-bitrate HLS ladder, keeps the child bound to a cancellation
//! scope, and reaps it asynchronously.

use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::Result;
use crate::config::EncoderConfig;

/// How long a stop request waits for a graceful exit before killing.
const GRACEFUL_STOP_TIMEOUT: Duration = Duration::from_secs(10);

/// Encoder input: the ingest file, optionally paired with an audio file.
///
/// The wire form is a single path or a pipe-delimited `video|audio`
/// pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncoderInput {
    /// Video-only; the encoder synthesizes silent stereo audio.
    Single(String),
    /// Video from input 0, audio from input 1.
    Pair { video: String, audio: String },
}

impl EncoderInput {
    /// Parse the pipe-delimited input spec.
    pub fn parse(spec: &str) -> Self {
        match spec.split_once('|') {
            Some((video, audio)) if !audio.trim().is_empty() => Self::Pair {
                video: video.trim().to_string(),
                audio: audio.trim().to_string(),
            },
            Some((video, _)) => Self::Single(video.trim().to_string()),
            None => Self::Single(spec.trim().to_string()),
        }
    }

    /// All input paths, for readiness polling.
    pub fn paths(&self) -> Vec<&str> {
        match self {
            Self::Single(video) => vec![video],
            Self::Pair { video, audio } => vec![video, audio],
        }
    }
}

impl std::fmt::Display for EncoderInput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Single(video) => write!(f, "{}", video),
            Self::Pair { video, audio } => write!(f, "{}|{}", video, audio),
        }
    }
}

/// Supervisor for one stream's ffmpeg child process.
pub struct FfmpegSupervisor {
    config: EncoderConfig,
    /// Cached version string from the `-version` probe.
    version: Option<String>,
    /// Cancellation scope of the running child, if any.
    scope: Mutex<Option<CancellationToken>>,
    running: Arc<AtomicBool>,
}

impl FfmpegSupervisor {
    pub fn new(config: EncoderConfig) -> Self {
        let version = Self::detect_version(&config.ffmpeg_path);
        Self {
            config,
            version,
            scope: Mutex::new(None),
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Detect the ffmpeg version.
    fn detect_version(path: &str) -> Option<String> {
        std::process::Command::new(path)
            .arg("-version")
            .output()
            .ok()
            .and_then(|output| {
                String::from_utf8(output.stdout)
                    .ok()
                    .and_then(|s| s.lines().next().map(|l| l.to_string()))
            })
    }

    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Spawn ffmpeg for `input` and begin monitoring it.
    ///
    /// Output directories (one per variant, plus the recording directory
    /// when enabled) are created eagerly under `output_root`. Fails with
    /// [`crate::Error::AlreadyRunning`] if the supervisor already owns a
    /// child.
    pub fn start(
        &self,
        parent: &CancellationToken,
        input: &EncoderInput,
        stream_id: &str,
        output_root: &Path,
    ) -> Result<()> {
        let mut scope = self.scope.lock();
        if self.running.load(Ordering::SeqCst) {
            return Err(crate::Error::AlreadyRunning);
        }

        create_output_dirs(&self.config, output_root)?;

        let args = build_args(&self.config, input, stream_id, output_root);
        info!(stream_id, "Starting ffmpeg with args: {:?}", args);

        let mut child = Command::new(&self.config.ffmpeg_path)
            .args(&args)
            .env("LC_ALL", "C")
            .stdin(Stdio::piped()) // allow graceful stop via 'q'
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| crate::Error::internal(format!("Failed to spawn ffmpeg: {}", e)))?;

        let mut stdin = child.stdin.take();

        if let Some(stdout) = child.stdout.take() {
            let id = stream_id.to_string();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stdout).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!("FFmpeg stdout for {}: {}", id, line);
                }
            });
        }

        if let Some(stderr) = child.stderr.take() {
            let id = stream_id.to_string();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    if line.contains("Error") || line.contains("error") {
                        warn!("FFmpeg error for {}: {}", id, line);
                    } else {
                        debug!("FFmpeg stderr for {}: {}", id, line);
                    }
                }
            });
        }

        let token = parent.child_token();
        let waiter_token = token.clone();
        let running = Arc::clone(&self.running);
        let id = stream_id.to_string();

        running.store(true, Ordering::SeqCst);
        *scope = Some(token);

        tokio::spawn(async move {
            let exit_code = tokio::select! {
                status = child.wait() => {
                    match status {
                        Ok(exit_status) => exit_status.code(),
                        Err(e) => {
                            error!("Error waiting for ffmpeg process: {}", e);
                            Some(-1)
                        }
                    }
                }
                _ = waiter_token.cancelled() => {
                    debug!("FFmpeg stop requested, sending 'q' for graceful exit");
                    if let Some(mut stdin) = stdin.take() {
                        use tokio::io::AsyncWriteExt;
                        let _ = stdin.write_all(b"q").await;
                        let _ = stdin.flush().await;
                        let _ = stdin.shutdown().await;
                    }

                    match tokio::time::timeout(GRACEFUL_STOP_TIMEOUT, child.wait()).await {
                        Ok(Ok(exit_status)) => exit_status.code(),
                        Ok(Err(e)) => {
                            error!("Error waiting for ffmpeg after stop request: {}", e);
                            Some(-1)
                        }
                        Err(_) => {
                            warn!("FFmpeg did not exit in time; killing process");
                            let _ = child.kill().await;
                            match child.wait().await {
                                Ok(exit_status) => exit_status.code(),
                                Err(e) => {
                                    error!("Error waiting for killed ffmpeg process: {}", e);
                                    Some(-1)
                                }
                            }
                        }
                    }
                }
            };

            running.store(false, Ordering::SeqCst);

            if waiter_token.is_cancelled() {
                info!(stream_id = %id, ?exit_code, "Encoder exited after stop request");
            } else {
                match exit_code {
                    Some(0) => info!(stream_id = %id, "Encoder finished"),
                    code => error!(stream_id = %id, ?code, "Encoder exited unexpectedly"),
                }
            }
        });

        Ok(())
    }

    /// Request the child to stop. Idempotent; the monitor task reports
    /// the eventual exit.
    pub fn stop(&self) {
        if let Some(token) = self.scope.lock().take() {
            token.cancel();
        }
    }
}

/// Create the per-variant output directories (and the recording
/// directory when enabled) under `output_root`.
fn create_output_dirs(config: &EncoderConfig, output_root: &Path) -> Result<()> {
    for variant in &config.variants {
        std::fs::create_dir_all(output_root.join(&variant.name))?;
    }
    if config.record_format.is_some() {
        std::fs::create_dir_all(output_root.join("recording"))?;
    }
    Ok(())
}

/// Build the ffmpeg argument vector for one stream.
///
/// Video always comes from input 0. Audio comes from input 1: either
/// the ingest audio file or a synthesized silent stereo source, so the
/// variant mapping is identical in both modes. All HLS muxer flags
/// accumulate into a single `-hls_flags` value.
fn build_args(
    config: &EncoderConfig,
    input: &EncoderInput,
    stream_id: &str,
    output_root: &Path,
) -> Vec<String> {
    let mut args: Vec<String> = vec!["-y".into(), "-hide_banner".into()];

    // Inputs. The ingest container carries no timestamps, so the frame
    // rate is stated explicitly and reading happens at native speed.
    match input {
        EncoderInput::Single(video) => {
            args.extend([
                "-re".into(),
                "-framerate".into(),
                config.frame_rate.to_string(),
                "-i".into(),
                video.clone(),
                "-f".into(),
                "lavfi".into(),
                "-i".into(),
                format!(
                    "anullsrc=channel_layout=stereo:sample_rate={}",
                    config.audio_sample_rate
                ),
            ]);
        }
        EncoderInput::Pair { video, audio } => {
            args.extend([
                "-re".into(),
                "-framerate".into(),
                config.frame_rate.to_string(),
                "-i".into(),
                video.clone(),
                "-i".into(),
                audio.clone(),
            ]);
        }
    }

    // One video/audio mapping per ladder rung.
    for _ in &config.variants {
        args.extend(["-map".into(), "0:v:0".into(), "-map".into(), "1:a:0".into()]);
    }

    // Per-variant scaling and rate control.
    for (i, variant) in config.variants.iter().enumerate() {
        args.extend([
            format!("-filter:v:{}", i),
            format!("scale=-2:{}", variant.height),
            format!("-c:v:{}", i),
            "libx264".into(),
            format!("-b:v:{}", i),
            variant.video_bitrate.clone(),
        ]);
    }

    args.extend([
        "-c:a".into(),
        "aac".into(),
        "-b:a".into(),
        config.audio_bitrate.clone(),
        "-ar".into(),
        config.audio_sample_rate.to_string(),
        "-preset".into(),
        config.preset.clone(),
        "-g".into(),
        config.gop_size().to_string(),
        "-sc_threshold".into(),
        "0".into(),
    ]);

    let mut hls_flags = vec![
        "independent_segments",
        "delete_segments",
        "append_list",
        "omit_endlist",
    ];
    if config.low_latency {
        hls_flags.push("split_by_time");
    }

    let var_stream_map = config
        .variants
        .iter()
        .enumerate()
        .map(|(i, v)| format!("v:{},a:{},name:{}", i, i, v.name))
        .collect::<Vec<_>>()
        .join(" ");

    let root = output_root.to_string_lossy().replace('\\', "/");

    args.extend([
        "-f".into(),
        "hls".into(),
        "-hls_time".into(),
        config.segment_seconds.to_string(),
        "-hls_list_size".into(),
        config.playlist_window.to_string(),
        "-hls_flags".into(),
        hls_flags.join("+"),
        "-hls_segment_type".into(),
        "mpegts".into(),
        "-hls_segment_filename".into(),
        format!("{}/%v/segment_%03d.ts", root),
        "-master_pl_name".into(),
        "playlist.m3u8".into(),
        "-var_stream_map".into(),
        var_stream_map,
        format!("{}/%v/playlist.m3u8", root),
    ]);

    // Optional full-resolution recording as a second, stream-copied
    // output.
    if let Some(fmt) = &config.record_format {
        args.extend([
            "-map".into(),
            "0:v:0".into(),
            "-c:v".into(),
            "copy".into(),
            format!("{}/recording/{}.{}", root, stream_id, fmt),
        ]);
    }

    args
}
