//! Screen capture via FFmpeg grab devices
//!
//! The screen feed comes from an FFmpeg child process reading the
//! platform's grab input (x11grab on Linux, avfoundation on macOS, gdigrab
//! on Windows) and decoding to raw RGBA on stdout, so the compositor sees
//! the same frame format everywhere.

use crate::capture::backend::RawFrame;
use crate::capture::types::{DisplayInfo, MediaSource, SourceFormat};
use crate::recorder::encoder::{RecordError, RecordResult};
use std::process::Stdio;
use std::sync::atomic::Ordering;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::sync::mpsc;

/// Grab-input arguments for the current platform
fn grab_input_args(display: &DisplayInfo, frame_rate: u32) -> Vec<String> {
    let size = format!("{}x{}", display.width(), display.height());

    #[cfg(target_os = "linux")]
    {
        let source = std::env::var("DISPLAY").unwrap_or_else(|_| ":0".to_string());
        vec![
            "-f".to_string(),
            "x11grab".to_string(),
            "-framerate".to_string(),
            frame_rate.to_string(),
            "-video_size".to_string(),
            size,
            "-i".to_string(),
            format!("{source}.0+{},{}", display.bounds.x, display.bounds.y),
        ]
    }

    #[cfg(target_os = "macos")]
    {
        let _ = size;
        vec![
            "-f".to_string(),
            "avfoundation".to_string(),
            "-framerate".to_string(),
            frame_rate.to_string(),
            "-capture_cursor".to_string(),
            "1".to_string(),
            "-i".to_string(),
            format!("{}:none", display.id),
        ]
    }

    #[cfg(target_os = "windows")]
    {
        let _ = size;
        vec![
            "-f".to_string(),
            "gdigrab".to_string(),
            "-framerate".to_string(),
            frame_rate.to_string(),
            "-i".to_string(),
            "desktop".to_string(),
        ]
    }

    #[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
    {
        let _ = (size, frame_rate);
        Vec::new()
    }
}

/// Open a live screen feed for `display`.
///
/// Frames arrive at the display's native resolution until the handle is
/// stopped or the grab process ends.
pub(crate) async fn open_grab(
    display: &DisplayInfo,
    frame_rate: u32,
) -> RecordResult<(MediaSource, mpsc::Receiver<RawFrame>)> {
    let input = grab_input_args(display, frame_rate);
    if input.is_empty() {
        return Err(RecordError::DeviceUnavailable(
            "screen capture is not supported on this platform".to_string(),
        ));
    }

    let width = display.width();
    let height = display.height();
    let size = format!("{width}x{height}");

    let mut args: Vec<String> = vec!["-hide_banner".to_string(), "-loglevel".to_string(), "error".to_string()];
    args.extend(input);
    // Normalize to the advertised geometry so every frame has a fixed size
    args.extend([
        "-f".to_string(),
        "rawvideo".to_string(),
        "-pix_fmt".to_string(),
        "rgba".to_string(),
        "-s".to_string(),
        size,
        "pipe:1".to_string(),
    ]);

    let mut child = Command::new("ffmpeg")
        .args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| RecordError::DeviceUnavailable(format!("failed to start screen grab: {e}")))?;

    let stdout = child.stdout.take().ok_or_else(|| {
        RecordError::DeviceUnavailable("failed to capture screen grab stdout".to_string())
    })?;

    let source = MediaSource::new(
        SourceFormat::Video { width, height },
        display.name.clone(),
    );
    let live = source.live_flag();

    let frame_size = (width * height * 4) as usize;
    let (frame_tx, frame_rx) = mpsc::channel(8);

    tokio::spawn(async move {
        let mut stdout = stdout;
        let mut buffer = vec![0u8; frame_size];

        loop {
            if !live.load(Ordering::SeqCst) {
                let _ = child.start_kill();
                break;
            }

            match stdout.read_exact(&mut buffer).await {
                Ok(_) => {
                    let frame = RawFrame { data: buffer.clone(), width, height };
                    if frame_tx.send(frame).await.is_err() {
                        let _ = child.start_kill();
                        break;
                    }
                }
                Err(e) => {
                    if e.kind() != std::io::ErrorKind::UnexpectedEof {
                        tracing::error!("screen grab read failed: {}", e);
                    }
                    break;
                }
            }
        }

        // The track is over either way; make the handle reflect it
        live.store(false, Ordering::SeqCst);
        let _ = child.wait().await;
        tracing::debug!("screen grab process exited");
    });

    let source_name = &display.name;
    tracing::info!("video source acquired: {} ({}x{} @ {}fps)", source_name, width, height, frame_rate);

    Ok((source, frame_rx))
}
