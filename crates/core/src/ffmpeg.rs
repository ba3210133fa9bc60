//! FFmpeg/FFprobe command helpers for video sources.
//!
//! Workers probe a source with `ffprobe` before decoding it, then run
//! `ffmpeg` to turn the source into a stream of JPEG frames on stdout
//! (`-f image2pipe -vcodec mjpeg`).

use std::ffi::OsStr;
use std::path::Path;
use std::process::Stdio;

use serde::Deserialize;
use tokio::process::Command;

/// JPEG quality passed to ffmpeg's `-q:v` (lower is better).
const MJPEG_QUALITY: &str = "3";

#[derive(Debug, thiserror::Error)]
pub enum FfmpegError {
    #[error("ffprobe/ffmpeg binary not found: {0}")]
    NotFound(std::io::Error),

    #[error("ffprobe/ffmpeg execution failed (exit code {exit_code:?}): {stderr}")]
    ExecutionFailed {
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("failed to parse ffprobe output: {0}")]
    ParseError(String),

    #[error("source has no video stream: {0}")]
    NoVideoStream(String),

    #[error("video file not found: {0}")]
    VideoNotFound(String),
}

// ---------------------------------------------------------------------------
// ffprobe JSON output structures
// ---------------------------------------------------------------------------

/// Top-level ffprobe JSON output (`-print_format json -show_streams`).
#[derive(Debug, Deserialize)]
pub struct FfprobeOutput {
    #[serde(default)]
    pub streams: Vec<FfprobeStream>,
}

#[derive(Debug, Deserialize)]
pub struct FfprobeStream {
    pub codec_name: Option<String>,
    pub codec_type: Option<String>,
    pub width: Option<i32>,
    pub height: Option<i32>,
    /// e.g. "30/1" or "24000/1001"
    pub r_frame_rate: Option<String>,
}

/// Summary of a probed source's primary video stream.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoInfo {
    pub codec: String,
    pub width: i32,
    pub height: i32,
    pub fps: f64,
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Probe a local video file.
pub async fn probe_file(path: &Path) -> Result<VideoInfo, FfmpegError> {
    if !path.exists() {
        return Err(FfmpegError::VideoNotFound(
            path.to_string_lossy().to_string(),
        ));
    }
    probe(path.as_os_str()).await
}

/// Probe a network stream URI.
pub async fn probe_stream(uri: &str) -> Result<VideoInfo, FfmpegError> {
    probe(OsStr::new(uri)).await
}

async fn probe(input: &OsStr) -> Result<VideoInfo, FfmpegError> {
    let output = Command::new("ffprobe")
        .args(["-v", "error", "-print_format", "json", "-show_streams"])
        .arg(input)
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(FfmpegError::NotFound)?;

    if !output.status.success() {
        return Err(FfmpegError::ExecutionFailed {
            exit_code: output.status.code(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    let parsed = serde_json::from_str::<FfprobeOutput>(&stdout)
        .map_err(|e| FfmpegError::ParseError(format!("{e}: {stdout}")))?;

    video_info(&parsed)
        .ok_or_else(|| FfmpegError::NoVideoStream(input.to_string_lossy().to_string()))
}

/// Build the ffmpeg command that decodes `input` into JPEG frames on stdout.
///
/// stdin is closed, stderr is discarded; the caller reads stdout.
pub fn mjpeg_decode_command(input: &OsStr, live: bool) -> Command {
    let mut cmd = Command::new("ffmpeg");
    cmd.args(["-hide_banner", "-loglevel", "error", "-nostdin"]);
    if live {
        cmd.args(["-fflags", "nobuffer"]);
    }
    cmd.arg("-i")
        .arg(input)
        .args(["-an", "-f", "image2pipe", "-vcodec", "mjpeg", "-q:v", MJPEG_QUALITY, "-"])
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true);
    cmd
}

// ---------------------------------------------------------------------------
// Parsing helpers
// ---------------------------------------------------------------------------

fn first_video_stream(probe: &FfprobeOutput) -> Option<&FfprobeStream> {
    probe
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("video"))
}

/// Summarize the first video stream, if any.
pub fn video_info(probe: &FfprobeOutput) -> Option<VideoInfo> {
    let stream = first_video_stream(probe)?;
    Some(VideoInfo {
        codec: stream.codec_name.clone().unwrap_or_default(),
        width: stream.width.unwrap_or(0),
        height: stream.height.unwrap_or(0),
        fps: stream
            .r_frame_rate
            .as_deref()
            .map(parse_fraction)
            .unwrap_or(0.0),
    })
}

/// Parse a fraction string like `"30/1"` into a float.
fn parse_fraction(s: &str) -> f64 {
    match s.split_once('/') {
        Some((num, den)) => {
            let num = num.parse::<f64>().unwrap_or(0.0);
            let den = den.parse::<f64>().unwrap_or(0.0);
            if den > 0.0 {
                num / den
            } else {
                0.0
            }
        }
        None => s.parse::<f64>().unwrap_or(0.0),
    }
}
