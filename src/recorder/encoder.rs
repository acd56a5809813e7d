//! Stage-1 stream encoding
//!
//! The `StreamEncoder` trait is the incremental encoder the recorder
//! drives; `VpxEncoder` is the production implementation, an FFmpeg child
//! process producing a VP9/Opus WebM container. Video frames stream over
//! stdin as raw RGBA, audio samples over a named pipe, and the container
//! comes back on stdout in arbitrary-sized fragments delivered in
//! production order.

use crate::mux::{MuxedStream, StreamFormat};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

/// Errors from device acquisition and stage-1 recording
#[derive(Error, Debug)]
pub enum RecordError {
    #[error("device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("already recording")]
    AlreadyRecording,

    #[error("not recording")]
    NotRecording,

    #[error("{0} stream is not live")]
    SourceNotReady(&'static str),

    #[error("encoding failure: {0}")]
    Encoding(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for recording operations
pub type RecordResult<T> = Result<T, RecordError>;

/// Incremental encoder for a muxed stream.
///
/// `start` consumes the stream and returns the channel its encoded
/// container chunks arrive on, in production order. `finish` flushes the
/// encoder; the chunk channel closes once the final fragment has been
/// delivered.
#[async_trait]
pub trait StreamEncoder: Send {
    async fn start(&mut self, stream: MuxedStream) -> RecordResult<mpsc::Receiver<Vec<u8>>>;

    async fn finish(&mut self) -> RecordResult<()>;
}

/// Check that the ffmpeg binary is reachable
pub fn ffmpeg_available() -> bool {
    std::process::Command::new("ffmpeg")
        .arg("-version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|status| status.success())
        .unwrap_or(false)
}

/// FFmpeg argument list for the fixed VP9/Opus WebM profile
fn encode_args(format: &StreamFormat, audio_pipe: &Path) -> Vec<String> {
    vec![
        "-hide_banner".to_string(),
        "-loglevel".to_string(),
        "error".to_string(),
        // Input 0: raw RGBA frames on stdin
        "-f".to_string(),
        "rawvideo".to_string(),
        "-pix_fmt".to_string(),
        "rgba".to_string(),
        "-s".to_string(),
        format!("{}x{}", format.video.width, format.video.height),
        "-r".to_string(),
        format.video.frame_rate.to_string(),
        "-i".to_string(),
        "-".to_string(),
        // Input 1: raw PCM over the named pipe
        "-f".to_string(),
        "s16le".to_string(),
        "-ar".to_string(),
        format.audio.sample_rate.to_string(),
        "-ac".to_string(),
        format.audio.channels.to_string(),
        "-i".to_string(),
        audio_pipe.to_string_lossy().to_string(),
        // Fixed codec profile: lossy VP9 + Opus in WebM
        "-c:v".to_string(),
        "libvpx-vp9".to_string(),
        "-deadline".to_string(),
        "realtime".to_string(),
        "-cpu-used".to_string(),
        "8".to_string(),
        "-b:v".to_string(),
        "0".to_string(),
        "-crf".to_string(),
        "30".to_string(),
        "-c:a".to_string(),
        "libopus".to_string(),
        "-f".to_string(),
        "webm".to_string(),
        "pipe:1".to_string(),
    ]
}

#[cfg(unix)]
fn make_audio_pipe(dir: &Path) -> RecordResult<PathBuf> {
    use nix::sys::stat::Mode;

    let path = dir.join("audio.pcm");
    nix::unistd::mkfifo(&path, Mode::S_IRUSR | Mode::S_IWUSR)
        .map_err(|e| RecordError::Encoding(format!("failed to create audio pipe: {e}")))?;
    Ok(path)
}

#[cfg(not(unix))]
fn make_audio_pipe(_dir: &Path) -> RecordResult<PathBuf> {
    Err(RecordError::Encoding(
        "stage-1 audio piping is not supported on this platform".to_string(),
    ))
}

/// VP9/Opus WebM encoder backed by an FFmpeg child process
pub struct VpxEncoder {
    scratch: Option<tempfile::TempDir>,
    child: Option<Child>,
    stderr: Option<tokio::process::ChildStderr>,
    stop_tx: Option<watch::Sender<bool>>,
    video_task: Option<JoinHandle<()>>,
    audio_task: Option<JoinHandle<()>>,
}

impl VpxEncoder {
    pub fn new() -> Self {
        Self {
            scratch: None,
            child: None,
            stderr: None,
            stop_tx: None,
            video_task: None,
            audio_task: None,
        }
    }
}

impl Default for VpxEncoder {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StreamEncoder for VpxEncoder {
    async fn start(&mut self, stream: MuxedStream) -> RecordResult<mpsc::Receiver<Vec<u8>>> {
        if self.child.is_some() {
            return Err(RecordError::AlreadyRecording);
        }
        if !ffmpeg_available() {
            return Err(RecordError::Encoding(
                "ffmpeg not found; install FFmpeg and add it to PATH".to_string(),
            ));
        }

        let format = stream.format();
        let scratch = tempfile::tempdir()?;
        let audio_pipe = make_audio_pipe(scratch.path())?;
        let args = encode_args(&format, &audio_pipe);

        tracing::info!("starting stage-1 encoder: ffmpeg {:?}", args);

        let mut child = Command::new("ffmpeg")
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| RecordError::Encoding(format!("failed to start ffmpeg: {e}")))?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| RecordError::Encoding("failed to open ffmpeg stdin".to_string()))?;
        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| RecordError::Encoding("failed to open ffmpeg stdout".to_string()))?;
        self.stderr = child.stderr.take();

        let (stop_tx, stop_rx) = watch::channel(false);
        let (mut video_rx, mut audio_rx) = stream.split();

        // Video writer: composited frames to stdin until the track closes
        // or the encoder is flushed
        let mut video_stop = stop_rx.clone();
        self.video_task = Some(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = video_stop.changed() => break,
                    frame = video_rx.recv() => match frame {
                        Some(frame) => {
                            if let Err(e) = stdin.write_all(&frame.data).await {
                                tracing::error!("video write to encoder failed: {}", e);
                                break;
                            }
                        }
                        None => break,
                    },
                }
            }
            // Dropping stdin is the video EOF
        }));

        // Audio writer: PCM blocks into the named pipe. Opening blocks
        // until ffmpeg opens the read side.
        let mut audio_stop = stop_rx;
        self.audio_task = Some(tokio::spawn(async move {
            let mut pipe = match tokio::fs::OpenOptions::new().write(true).open(&audio_pipe).await {
                Ok(pipe) => pipe,
                Err(e) => {
                    tracing::error!("failed to open audio pipe: {}", e);
                    return;
                }
            };
            loop {
                tokio::select! {
                    _ = audio_stop.changed() => break,
                    frame = audio_rx.recv() => match frame {
                        Some(frame) => {
                            let mut bytes = Vec::with_capacity(frame.samples.len() * 2);
                            for sample in &frame.samples {
                                bytes.extend_from_slice(&sample.to_le_bytes());
                            }
                            if let Err(e) = pipe.write_all(&bytes).await {
                                tracing::error!("audio write to encoder failed: {}", e);
                                break;
                            }
                        }
                        None => break,
                    },
                }
            }
            // Closing the pipe is the audio EOF
        }));

        // Chunk reader: WebM fragments from stdout, in production order.
        // The channel closes when the container stream ends.
        let (chunk_tx, chunk_rx) = mpsc::channel(64);
        tokio::spawn(async move {
            let mut buffer = vec![0u8; 64 * 1024];
            loop {
                match stdout.read(&mut buffer).await {
                    Ok(0) => break,
                    Ok(n) => {
                        if chunk_tx.send(buffer[..n].to_vec()).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::error!("encoder output read failed: {}", e);
                        break;
                    }
                }
            }
        });

        self.scratch = Some(scratch);
        self.child = Some(child);
        self.stop_tx = Some(stop_tx);

        Ok(chunk_rx)
    }

    async fn finish(&mut self) -> RecordResult<()> {
        let mut child = self.child.take().ok_or(RecordError::NotRecording)?;

        // Stop both writers; their drops close the encoder's inputs and the
        // container gets finalized
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(true);
        }
        if let Some(task) = self.video_task.take() {
            let _ = task.await;
        }
        if let Some(task) = self.audio_task.take() {
            let _ = task.await;
        }

        let mut diagnostics = Vec::new();
        if let Some(mut stderr) = self.stderr.take() {
            let _ = stderr.read_to_end(&mut diagnostics).await;
        }

        let status = child
            .wait()
            .await
            .map_err(|e| RecordError::Encoding(format!("failed to wait for ffmpeg: {e}")))?;

        self.scratch = None;

        if !status.success() {
            let stderr = String::from_utf8_lossy(&diagnostics).trim().to_string();
            return Err(RecordError::Encoding(if stderr.is_empty() {
                format!("ffmpeg exited with {status}")
            } else {
                stderr
            }));
        }

        tracing::info!("stage-1 encoder flushed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mux::{AudioFormat, StreamFormat, VideoFormat};

    #[test]
    fn encode_args_pin_the_codec_profile() {
        let format = StreamFormat {
            video: VideoFormat { width: 960, height: 540, frame_rate: 60 },
            audio: AudioFormat { sample_rate: 48_000, channels: 1 },
        };
        let args = encode_args(&format, Path::new("/tmp/scratch/audio.pcm"));

        let joined = args.join(" ");
        assert!(joined.contains("-c:v libvpx-vp9"));
        assert!(joined.contains("-c:a libopus"));
        assert!(joined.contains("-f webm"));
        assert!(joined.contains("-s 960x540"));
        assert!(joined.contains("-r 60"));
        assert!(joined.contains("-ar 48000"));
        assert!(joined.contains("-ac 1"));
        assert!(joined.ends_with("pipe:1"));
        assert!(args.contains(&"/tmp/scratch/audio.pcm".to_string()));
    }

    #[test]
    fn finishing_an_idle_encoder_is_a_state_error() {
        let mut encoder = VpxEncoder::new();
        let err = tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap()
            .block_on(encoder.finish())
            .unwrap_err();
        assert!(matches!(err, RecordError::NotRecording));
    }
}
