//! Microphone level metering
//!
//! Publishes a normalized input level from a live audio feed, for callers
//! that want to show signal activity while a device is selected.

use crate::capture::backend::AudioFrame;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

/// Normalized mean magnitude of one block of samples (0.0..=1.0)
pub fn block_level(samples: &[i16]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f64 = samples.iter().map(|s| f64::from(*s).abs()).sum();
    (sum / samples.len() as f64 / f64::from(i16::MAX)) as f32
}

/// Consumes an audio feed and publishes its current level
pub struct LevelMeter {
    rx: watch::Receiver<f32>,
    handle: JoinHandle<()>,
}

impl LevelMeter {
    /// Start metering the given feed; the consumed frames are dropped
    pub fn start(mut frames: mpsc::Receiver<AudioFrame>) -> Self {
        let (tx, rx) = watch::channel(0.0f32);
        let handle = tokio::spawn(async move {
            while let Some(frame) = frames.recv().await {
                let _ = tx.send(block_level(&frame.samples));
            }
            let _ = tx.send(0.0);
        });
        Self { rx, handle }
    }

    /// The most recently published level
    pub fn level(&self) -> f32 {
        *self.rx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<f32> {
        self.rx.clone()
    }

    pub fn stop(self) {
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn silence_is_zero() {
        assert_eq!(block_level(&[]), 0.0);
        assert_eq!(block_level(&[0, 0, 0, 0]), 0.0);
    }

    #[test]
    fn full_scale_is_one() {
        let level = block_level(&[i16::MAX, i16::MAX, -i16::MAX, -i16::MAX]);
        assert!((level - 1.0).abs() < 1e-4);
    }

    #[test]
    fn half_scale_is_half() {
        let half = i16::MAX / 2;
        let level = block_level(&[half, -half, half, -half]);
        assert!((level - 0.5).abs() < 1e-3);
    }

    #[tokio::test]
    async fn meter_follows_the_feed() {
        let (tx, rx) = mpsc::channel(4);
        let meter = LevelMeter::start(rx);
        let mut level_rx = meter.subscribe();

        tx.send(AudioFrame {
            samples: vec![i16::MAX; 64],
            sample_rate: 48_000,
            channels: 1,
        })
        .await
        .unwrap();

        level_rx.changed().await.unwrap();
        assert!(meter.level() > 0.9);

        drop(tx);
        // Feed closed: level resets to silence
        level_rx.changed().await.unwrap();
        assert_eq!(*level_rx.borrow(), 0.0);
        meter.stop();
    }
}
