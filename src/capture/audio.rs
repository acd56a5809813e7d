//! Microphone enumeration and capture via cpal
//!
//! Devices are identified by their cpal name. Capture runs on a dedicated
//! thread because cpal streams are not `Send`; samples are forwarded into
//! the pipeline as i16 PCM blocks.

use crate::capture::backend::AudioFrame;
use crate::capture::types::{AudioDeviceInfo, MediaSource, SourceFormat};
use crate::recorder::encoder::{RecordError, RecordResult};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::SampleFormat;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

/// List available audio input devices (microphones), in enumeration order
pub fn audio_input_devices() -> Vec<AudioDeviceInfo> {
    let host = cpal::default_host();
    let default_name = host
        .default_input_device()
        .and_then(|device| device.name().ok());

    let mut devices = Vec::new();
    let Ok(inputs) = host.input_devices() else {
        tracing::warn!("failed to enumerate audio input devices");
        return devices;
    };

    for device in inputs {
        let Ok(name) = device.name() else { continue };
        devices.push(AudioDeviceInfo {
            id: name.clone(),
            is_default: default_name.as_deref() == Some(name.as_str()),
            name,
        });
    }

    devices
}

/// Open a live microphone feed.
///
/// `device_id` of `None` selects the platform default input. The returned
/// channel closes when the handle is stopped or the stream errors out.
pub(crate) async fn open_microphone(
    device_id: Option<&str>,
) -> RecordResult<(MediaSource, mpsc::Receiver<AudioFrame>)> {
    let wanted = device_id.map(str::to_owned);
    let live = Arc::new(AtomicBool::new(true));
    let (frame_tx, frame_rx) = mpsc::channel(256);
    let (ready_tx, ready_rx) = oneshot::channel();

    let thread_live = live.clone();
    std::thread::Builder::new()
        .name("mic-capture".to_string())
        .spawn(move || capture_thread(wanted, thread_live, frame_tx, ready_tx))
        .map_err(|e| RecordError::DeviceUnavailable(format!("failed to spawn capture thread: {e}")))?;

    let (sample_rate, channels, name) = ready_rx
        .await
        .map_err(|_| RecordError::DeviceUnavailable("audio capture thread exited".to_string()))?
        .map_err(RecordError::DeviceUnavailable)?;

    tracing::info!("audio source acquired: {} ({}Hz, {}ch)", name, sample_rate, channels);

    let source = MediaSource::from_parts(
        SourceFormat::Audio { sample_rate, channels },
        name,
        live,
    );
    Ok((source, frame_rx))
}

type ReadySender = oneshot::Sender<Result<(u32, u16, String), String>>;

fn capture_thread(
    wanted: Option<String>,
    live: Arc<AtomicBool>,
    frame_tx: mpsc::Sender<AudioFrame>,
    ready_tx: ReadySender,
) {
    let host = cpal::default_host();

    let device = match &wanted {
        None => host.default_input_device(),
        Some(id) => host
            .input_devices()
            .ok()
            .and_then(|mut devices| {
                devices.find(|d| d.name().map(|n| &n == id).unwrap_or(false))
            }),
    };

    let Some(device) = device else {
        let what = wanted.as_deref().unwrap_or("default input");
        let _ = ready_tx.send(Err(format!("no audio input device found: {what}")));
        return;
    };

    let name = device.name().unwrap_or_else(|_| "Unknown".to_string());

    let supported = match device.default_input_config() {
        Ok(config) => config,
        Err(e) => {
            let _ = ready_tx.send(Err(format!("failed to get audio config for {name}: {e}")));
            return;
        }
    };

    let sample_format = supported.sample_format();
    let config: cpal::StreamConfig = supported.into();
    let sample_rate = config.sample_rate.0;
    let channels = config.channels;

    let stream = {
        let tx = frame_tx.clone();
        let is_live = live.clone();
        let err_fn = |e| tracing::error!("audio stream error: {}", e);

        match sample_format {
            SampleFormat::F32 => device.build_input_stream(
                &config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    if is_live.load(Ordering::Relaxed) {
                        let samples = data
                            .iter()
                            .map(|s| (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16)
                            .collect();
                        deliver(&tx, samples, sample_rate, channels);
                    }
                },
                err_fn,
                None,
            ),
            SampleFormat::I16 => device.build_input_stream(
                &config,
                move |data: &[i16], _: &cpal::InputCallbackInfo| {
                    if is_live.load(Ordering::Relaxed) {
                        deliver(&tx, data.to_vec(), sample_rate, channels);
                    }
                },
                err_fn,
                None,
            ),
            SampleFormat::U16 => device.build_input_stream(
                &config,
                move |data: &[u16], _: &cpal::InputCallbackInfo| {
                    if is_live.load(Ordering::Relaxed) {
                        let samples = data.iter().map(|s| (*s as i32 - 0x8000) as i16).collect();
                        deliver(&tx, samples, sample_rate, channels);
                    }
                },
                err_fn,
                None,
            ),
            other => {
                let _ = ready_tx.send(Err(format!("unsupported sample format: {other:?}")));
                return;
            }
        }
    };

    let stream = match stream {
        Ok(s) => s,
        Err(e) => {
            let _ = ready_tx.send(Err(format!("failed to open input stream on {name}: {e}")));
            return;
        }
    };

    if let Err(e) = stream.play() {
        let _ = ready_tx.send(Err(format!("failed to start input stream on {name}: {e}")));
        return;
    }

    let _ = ready_tx.send(Ok((sample_rate, channels, name)));

    // Keep the thread (and with it the stream) alive until the handle stops
    while live.load(Ordering::SeqCst) {
        std::thread::sleep(std::time::Duration::from_millis(100));
    }

    drop(stream);
    tracing::debug!("microphone capture thread exited");
}

fn deliver(tx: &mpsc::Sender<AudioFrame>, samples: Vec<i16>, sample_rate: u32, channels: u16) {
    // The pipeline consumes in real time; if it stalls, dropping blocks is
    // preferable to blocking inside the audio callback.
    let _ = tx.try_send(AudioFrame { samples, sample_rate, channels });
}
