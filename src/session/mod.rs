//! Session control
//!
//! The `SessionController` owns one recording attempt end to end: device
//! acquisition, compositing, muxing, stage-1 encoding, and the stage-2
//! conversion. It is the only component that moves the pipeline between
//! states; every stage failure lands here and flips the session to
//! `Error` without retrying.

use crate::capture::backend::{AudioFrame, DeviceBackend};
use crate::capture::level::block_level;
use crate::capture::source::DeviceSource;
use crate::capture::types::{AudioDeviceInfo, Bounds, DisplayInfo, MediaSource};
use crate::compositor::Compositor;
use crate::convert::{convert, default_output_path, ConversionError, ConversionJob};
use crate::mux::{AudioFormat, StreamMuxer, VideoFormat};
use crate::recorder::encoder::{RecordError, StreamEncoder, VpxEncoder};
use crate::recorder::{format_elapsed, Recorder};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;

/// Lifecycle of one recording session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// No session in progress
    Idle,
    /// Capturing and encoding the live stream
    Capturing,
    /// Flushing the stage-1 encoder into the intermediate artifact
    Encoding,
    /// The stage-2 conversion is running
    Converting,
    /// The final artifact was produced
    Done,
    /// A stage failed; a new session must be started
    Error,
}

/// Errors surfaced by the session controller
#[derive(Error, Debug)]
pub enum SessionError {
    #[error(transparent)]
    Record(#[from] RecordError),

    #[error(transparent)]
    Conversion(#[from] ConversionError),
}

pub type SessionResult<T> = Result<T, SessionError>;

/// Events emitted while a session runs
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// Capture and encoding started
    Started,
    /// One-second timer tick with the formatted elapsed time
    TimerTick(String),
    /// Recording stopped; the intermediate artifact is finalized
    Stopped,
    /// The stage-2 conversion started
    Converting,
    /// The final artifact was written
    Completed(PathBuf),
    /// A stage failed; the session is over
    Failed(String),
}

/// Configuration for one session
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionOptions {
    /// Bounds of the caller's window, used to pick the display to capture
    pub window: Option<Bounds>,

    /// Preferred audio input device; `None` selects the platform default
    pub audio_device: Option<String>,

    /// Compositor frame rate
    pub frame_rate: u32,

    /// Final artifact path; `None` resolves to the default output location
    pub output_path: Option<PathBuf>,

    /// Also write the intermediate WebM next to the final artifact
    pub keep_intermediate: bool,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            window: None,
            audio_device: None,
            frame_rate: 60,
            output_path: None,
            keep_intermediate: false,
        }
    }
}

/// Resolves when the stage-2 conversion finishes
#[derive(Debug)]
pub struct ConversionHandle {
    task: JoinHandle<SessionResult<PathBuf>>,
}

impl ConversionHandle {
    /// Wait for the conversion to resolve with the output path or the
    /// underlying encoder's error
    pub async fn wait(self) -> SessionResult<PathBuf> {
        match self.task.await {
            Ok(result) => result,
            Err(e) => Err(SessionError::Conversion(ConversionError::Ffmpeg(format!(
                "conversion task panicked: {e}"
            )))),
        }
    }
}

/// Stage handles for the session currently capturing
struct ActiveSession {
    devices: DeviceSource,
    compositor: Compositor,
    recorder: Recorder,
    timer: JoinHandle<()>,
    audio_pump: JoinHandle<()>,
    audio_swap: mpsc::Sender<mpsc::Receiver<AudioFrame>>,
}

type EncoderFactory = Box<dyn Fn() -> Box<dyn StreamEncoder> + Send + Sync>;

/// Coordinates the capture, composite, encode, and convert stages for one
/// recording attempt at a time
pub struct SessionController {
    backend: Arc<dyn DeviceBackend>,
    options: SessionOptions,
    encoder_factory: EncoderFactory,
    state: Arc<RwLock<SessionState>>,
    events: broadcast::Sender<SessionEvent>,
    level_tx: watch::Sender<f32>,
    level_rx: watch::Receiver<f32>,
    active: Option<ActiveSession>,
}

impl SessionController {
    /// Controller over the production VP9/WebM stage-1 encoder
    pub fn new(backend: Arc<dyn DeviceBackend>, options: SessionOptions) -> Self {
        Self::with_encoder_factory(backend, options, || Box::new(VpxEncoder::new()))
    }

    /// Controller with a caller-provided stage-1 encoder factory; a fresh
    /// encoder is constructed for every session
    pub fn with_encoder_factory(
        backend: Arc<dyn DeviceBackend>,
        options: SessionOptions,
        factory: impl Fn() -> Box<dyn StreamEncoder> + Send + Sync + 'static,
    ) -> Self {
        let (events, _) = broadcast::channel(64);
        let (level_tx, level_rx) = watch::channel(0.0f32);
        Self {
            backend,
            options,
            encoder_factory: Box::new(factory),
            state: Arc::new(RwLock::new(SessionState::Idle)),
            events,
            level_tx,
            level_rx,
            active: None,
        }
    }

    pub fn state(&self) -> SessionState {
        *self.state.read()
    }

    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    /// Subscribe to session events
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Current microphone input level (0.0..=1.0)
    pub fn level(&self) -> f32 {
        *self.level_rx.borrow()
    }

    pub fn subscribe_level(&self) -> watch::Receiver<f32> {
        self.level_rx.clone()
    }

    pub fn displays(&self) -> Vec<DisplayInfo> {
        self.backend.displays()
    }

    pub fn audio_inputs(&self) -> Vec<AudioDeviceInfo> {
        self.backend.audio_inputs()
    }

    /// Flip the session: start capturing when settled, stop and convert
    /// when capturing.
    ///
    /// Returns the conversion handle on the stop edge. While the previous
    /// session is still encoding or converting the toggle is rejected.
    pub async fn toggle(&mut self) -> SessionResult<Option<ConversionHandle>> {
        match self.state() {
            SessionState::Idle | SessionState::Done | SessionState::Error => {
                self.start().await?;
                Ok(None)
            }
            SessionState::Capturing => Ok(Some(self.stop().await?)),
            SessionState::Encoding | SessionState::Converting => {
                Err(RecordError::AlreadyRecording.into())
            }
        }
    }

    /// Start a new session: acquire the screen and microphone, bring up
    /// the compositor and muxer, and begin stage-1 encoding.
    ///
    /// Acquisition order is fixed: screen first, then audio; the muxed
    /// stream is only assembled once both sources are live.
    pub async fn start(&mut self) -> SessionResult<()> {
        match self.state() {
            SessionState::Idle | SessionState::Done | SessionState::Error => {}
            _ => return Err(RecordError::AlreadyRecording.into()),
        }

        match self.bring_up().await {
            Ok(active) => {
                self.active = Some(active);
                *self.state.write() = SessionState::Capturing;
                let _ = self.events.send(SessionEvent::Started);
                Ok(())
            }
            Err(e) => {
                tracing::error!("session start failed: {}", e);
                *self.state.write() = SessionState::Error;
                let _ = self.events.send(SessionEvent::Failed(e.to_string()));
                Err(e)
            }
        }
    }

    async fn bring_up(&mut self) -> SessionResult<ActiveSession> {
        let mut devices = DeviceSource::new(self.backend.clone());

        let raw_frames = devices.acquire_video(self.options.window.as_ref()).await?;
        let audio_frames = devices
            .acquire_audio(self.options.audio_device.as_deref())
            .await?;

        let (source_width, source_height) = devices
            .video()
            .and_then(MediaSource::video_dimensions)
            .ok_or_else(|| RecordError::SourceNotReady("video"))?;
        let (sample_rate, channels) = devices
            .audio()
            .and_then(MediaSource::audio_format)
            .ok_or_else(|| RecordError::SourceNotReady("audio"))?;

        let mut compositor = Compositor::new(source_width, source_height, self.options.frame_rate);
        let (width, height) = compositor.dimensions();
        let muxer = StreamMuxer::new(
            VideoFormat { width, height, frame_rate: self.options.frame_rate },
            AudioFormat { sample_rate, channels },
        );

        compositor.start(raw_frames, muxer.video_sink());

        let (audio_swap, swap_rx) = mpsc::channel(1);
        let audio_pump = tokio::spawn(pump_audio(
            audio_frames,
            swap_rx,
            muxer.audio_sink(),
            self.level_tx.clone(),
        ));

        // Both handles were acquired above; the ordering precondition holds
        let stream = match (devices.video(), devices.audio()) {
            (Some(video), Some(audio)) => muxer.combine(video, audio)?,
            _ => return Err(RecordError::SourceNotReady("audio").into()),
        };

        let mut recorder = Recorder::with_encoder((self.encoder_factory)());
        recorder.start(stream).await?;

        let timer = tokio::spawn(run_timer(self.events.clone()));

        Ok(ActiveSession {
            devices,
            compositor,
            recorder,
            timer,
            audio_pump,
            audio_swap,
        })
    }

    /// Stop capturing, finalize the intermediate artifact, and submit the
    /// conversion job.
    ///
    /// Returns immediately with a handle to the running conversion; once
    /// submitted, the job runs to completion or failure. The controller
    /// moves to `Done` or `Error` when the job resolves.
    pub async fn stop(&mut self) -> SessionResult<ConversionHandle> {
        if self.state() != SessionState::Capturing {
            return Err(RecordError::NotRecording.into());
        }
        let Some(mut active) = self.active.take() else {
            return Err(RecordError::NotRecording.into());
        };

        *self.state.write() = SessionState::Encoding;

        active.timer.abort();
        active.compositor.stop().await;
        // Closing the swap channel shuts the pump down and with it the
        // muxer's audio sink
        drop(active.audio_swap);
        let _ = active.audio_pump.await;

        let flushed = active.recorder.stop().await;
        active.devices.release();

        let artifact = match flushed {
            Ok(artifact) => artifact,
            Err(e) => {
                tracing::error!("stage-1 encoding failed: {}", e);
                *self.state.write() = SessionState::Error;
                let _ = self.events.send(SessionEvent::Failed(e.to_string()));
                return Err(e.into());
            }
        };
        let _ = self.events.send(SessionEvent::Stopped);

        let output_path = self
            .options
            .output_path
            .clone()
            .unwrap_or_else(default_output_path);

        if self.options.keep_intermediate {
            let webm_path = output_path.with_extension("webm");
            if let Err(e) = tokio::fs::write(&webm_path, artifact.as_bytes()).await {
                *self.state.write() = SessionState::Error;
                let _ = self.events.send(SessionEvent::Failed(e.to_string()));
                return Err(RecordError::Io(e).into());
            }
            tracing::info!("intermediate artifact kept at {}", webm_path.display());
        }

        *self.state.write() = SessionState::Converting;
        let _ = self.events.send(SessionEvent::Converting);

        let job = ConversionJob::new(artifact, output_path);
        let state = self.state.clone();
        let events = self.events.clone();
        let task = tokio::spawn(async move {
            match convert(job).await {
                Ok(path) => {
                    *state.write() = SessionState::Done;
                    let _ = events.send(SessionEvent::Completed(path.clone()));
                    Ok(path)
                }
                Err(e) => {
                    tracing::error!("conversion failed: {}", e);
                    *state.write() = SessionState::Error;
                    let _ = events.send(SessionEvent::Failed(e.to_string()));
                    Err(SessionError::Conversion(e))
                }
            }
        });

        Ok(ConversionHandle { task })
    }

    /// Switch the microphone to `device_id`.
    ///
    /// The preference applies to future sessions; while capturing, the old
    /// track is released and the new device's feed re-attached to the live
    /// muxer sink. A failed mid-session switch leaves the session without
    /// audio and is treated as a stage failure.
    pub async fn select_audio_source(&mut self, device_id: &str) -> SessionResult<()> {
        self.options.audio_device = Some(device_id.to_string());
        if self.state() != SessionState::Capturing {
            return Ok(());
        }
        let Some(active) = self.active.as_mut() else {
            return Err(RecordError::NotRecording.into());
        };

        match active.devices.acquire_audio(Some(device_id)).await {
            Ok(new_feed) => {
                if active.audio_swap.send(new_feed).await.is_err() {
                    return Err(RecordError::SourceNotReady("audio").into());
                }
                tracing::info!("audio source switched to {}", device_id);
                Ok(())
            }
            Err(e) => {
                self.abort(&e.to_string()).await;
                Err(e.into())
            }
        }
    }

    /// Tear the session down: stop any active recording first, then
    /// release the device handles. The pending artifact is discarded.
    pub async fn shutdown(&mut self) {
        if let Some(mut active) = self.active.take() {
            tracing::info!("shutting down with an active session; discarding it");
            active.timer.abort();
            active.compositor.stop().await;
            drop(active.audio_swap);
            let _ = active.audio_pump.await;
            let _ = active.recorder.stop().await;
            active.devices.release();
        }
        *self.state.write() = SessionState::Idle;
    }

    /// Abandon the active session after a stage failure
    async fn abort(&mut self, reason: &str) {
        if let Some(mut active) = self.active.take() {
            active.timer.abort();
            active.compositor.stop().await;
            drop(active.audio_swap);
            let _ = active.audio_pump.await;
            let _ = active.recorder.stop().await;
            active.devices.release();
        }
        *self.state.write() = SessionState::Error;
        let _ = self.events.send(SessionEvent::Failed(reason.to_string()));
    }
}

/// Forward microphone blocks into the muxer sink, publishing the input
/// level along the way. The feed can be replaced mid-session through the
/// swap channel; closing the swap channel ends the pump.
async fn pump_audio(
    mut frames: mpsc::Receiver<AudioFrame>,
    mut swap: mpsc::Receiver<mpsc::Receiver<AudioFrame>>,
    sink: mpsc::Sender<AudioFrame>,
    level: watch::Sender<f32>,
) {
    loop {
        tokio::select! {
            replacement = swap.recv() => match replacement {
                Some(new_frames) => frames = new_frames,
                None => break,
            },
            frame = frames.recv() => match frame {
                Some(frame) => {
                    let _ = level.send(block_level(&frame.samples));
                    if sink.send(frame).await.is_err() {
                        break;
                    }
                }
                // Feed ended; hold out for a replacement or shutdown
                None => match swap.recv().await {
                    Some(new_frames) => frames = new_frames,
                    None => break,
                },
            },
        }
    }
    let _ = level.send(0.0);
    tracing::debug!("audio pump exited");
}

/// Broadcast a formatted elapsed-time tick once per second
async fn run_timer(events: broadcast::Sender<SessionEvent>) {
    let epoch = Instant::now();
    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    // The first tick fires immediately; skip it so ticks land on whole seconds
    ticker.tick().await;
    loop {
        ticker.tick().await;
        let _ = events.send(SessionEvent::TimerTick(format_elapsed(epoch.elapsed())));
    }
}
