//! Synthetic capture backend
//!
//! Generates a moving test pattern and a sine tone at real-time pace
//! instead of touching real devices. Lets the full pipeline run on
//! machines with nothing to capture, and backs the integration tests.

use crate::capture::backend::{AudioFrame, DeviceBackend, RawFrame};
use crate::capture::types::{AudioDeviceInfo, Bounds, DisplayInfo, MediaSource, SourceFormat};
use crate::recorder::encoder::{RecordError, RecordResult};
use async_trait::async_trait;
use std::f32::consts::TAU;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tokio::sync::mpsc;

const SAMPLE_RATE: u32 = 48_000;
const TONE_HZ: f32 = 440.0;
/// 20 ms of mono audio per block
const BLOCK_SAMPLES: usize = 960;

/// Device backend producing synthetic signals
pub struct SyntheticBackend {
    displays: Vec<DisplayInfo>,
    audio_inputs: Vec<AudioDeviceInfo>,
    frame_rate: u32,
}

impl SyntheticBackend {
    pub fn new() -> Self {
        Self {
            displays: vec![DisplayInfo {
                id: 0,
                name: "Synthetic Display".to_string(),
                bounds: Bounds::new(0, 0, 1280, 800),
                is_primary: true,
                refresh_rate: Some(60),
            }],
            audio_inputs: vec![AudioDeviceInfo {
                id: "synthetic-mic".to_string(),
                name: "Synthetic Microphone".to_string(),
                is_default: true,
            }],
            frame_rate: 30,
        }
    }

    /// Replace the enumerated displays
    pub fn with_displays(mut self, displays: Vec<DisplayInfo>) -> Self {
        self.displays = displays;
        self
    }

    /// Replace the enumerated audio inputs (an empty list makes every
    /// acquisition fail with `DeviceUnavailable`)
    pub fn with_audio_inputs(mut self, inputs: Vec<AudioDeviceInfo>) -> Self {
        self.audio_inputs = inputs;
        self
    }

    pub fn with_frame_rate(mut self, frame_rate: u32) -> Self {
        self.frame_rate = frame_rate.max(1);
        self
    }
}

impl Default for SyntheticBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DeviceBackend for SyntheticBackend {
    fn displays(&self) -> Vec<DisplayInfo> {
        self.displays.clone()
    }

    fn audio_inputs(&self) -> Vec<AudioDeviceInfo> {
        self.audio_inputs.clone()
    }

    async fn open_display(
        &self,
        display: &DisplayInfo,
    ) -> RecordResult<(MediaSource, mpsc::Receiver<RawFrame>)> {
        let width = display.width();
        let height = display.height();
        let source = MediaSource::new(SourceFormat::Video { width, height }, display.name.clone());
        let live = source.live_flag();
        let frame_rate = self.frame_rate;

        let (tx, rx) = mpsc::channel(8);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_micros(
                1_000_000 / u64::from(frame_rate),
            ));
            let mut tick: u64 = 0;
            while live.load(Ordering::SeqCst) {
                ticker.tick().await;
                let frame = RawFrame {
                    data: test_pattern(width, height, tick),
                    width,
                    height,
                };
                if tx.send(frame).await.is_err() {
                    break;
                }
                tick += 1;
            }
        });

        Ok((source, rx))
    }

    async fn open_audio(
        &self,
        device_id: Option<&str>,
    ) -> RecordResult<(MediaSource, mpsc::Receiver<AudioFrame>)> {
        let device = match device_id {
            Some(id) => self.audio_inputs.iter().find(|d| d.id == id),
            None => self
                .audio_inputs
                .iter()
                .find(|d| d.is_default)
                .or_else(|| self.audio_inputs.first()),
        };
        let Some(device) = device else {
            let what = device_id.unwrap_or("default input");
            return Err(RecordError::DeviceUnavailable(format!(
                "no audio input device found: {what}"
            )));
        };

        let source = MediaSource::new(
            SourceFormat::Audio { sample_rate: SAMPLE_RATE, channels: 1 },
            device.name.clone(),
        );
        let live = source.live_flag();

        let (tx, rx) = mpsc::channel(64);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_millis(20));
            let mut position: u64 = 0;
            while live.load(Ordering::SeqCst) {
                ticker.tick().await;
                let samples = tone_block(position);
                position += BLOCK_SAMPLES as u64;
                let frame = AudioFrame { samples, sample_rate: SAMPLE_RATE, channels: 1 };
                if tx.send(frame).await.is_err() {
                    break;
                }
            }
        });

        Ok((source, rx))
    }
}

/// Horizontal/vertical gradient with a bright stripe that advances each tick
fn test_pattern(width: u32, height: u32, tick: u64) -> Vec<u8> {
    let mut data = vec![0u8; (width * height * 4) as usize];
    let stripe = (tick * 8 % u64::from(width)) as u32;

    for y in 0..height {
        for x in 0..width {
            let i = ((y * width + x) * 4) as usize;
            let in_stripe = x.abs_diff(stripe) < 8;
            data[i] = if in_stripe { 255 } else { (x * 255 / width) as u8 };
            data[i + 1] = (y * 255 / height) as u8;
            data[i + 2] = 64;
            data[i + 3] = 255;
        }
    }

    data
}

/// One block of a 440 Hz sine at modest amplitude
fn tone_block(position: u64) -> Vec<i16> {
    (0..BLOCK_SAMPLES)
        .map(|n| {
            let t = (position + n as u64) as f32 / SAMPLE_RATE as f32;
            ((TAU * TONE_HZ * t).sin() * 0.2 * i16::MAX as f32) as i16
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn acquisition_fails_without_audio_inputs() {
        let backend = SyntheticBackend::new().with_audio_inputs(Vec::new());
        let err = backend.open_audio(None).await.unwrap_err();
        assert!(matches!(err, RecordError::DeviceUnavailable(_)));
    }

    #[tokio::test]
    async fn unknown_device_id_is_unavailable() {
        let backend = SyntheticBackend::new();
        let err = backend.open_audio(Some("usb-mic-7")).await.unwrap_err();
        assert!(matches!(err, RecordError::DeviceUnavailable(_)));
    }

    #[tokio::test]
    async fn synthetic_display_delivers_frames_until_stopped() {
        let backend = SyntheticBackend::new().with_frame_rate(120);
        let display = backend.displays().remove(0);
        let (source, mut rx) = backend.open_display(&display).await.unwrap();

        let frame = rx.recv().await.expect("first frame");
        assert_eq!(frame.width, display.width());
        assert_eq!(frame.data.len(), (frame.width * frame.height * 4) as usize);

        source.stop();
        // Drain until the producer notices the stop and closes the channel
        while rx.recv().await.is_some() {}
    }
}
