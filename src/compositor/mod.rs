//! Frame compositor
//!
//! Continuously redraws the live screen feed onto a fixed-size back
//! buffer: the source is scaled to a 960-wide canvas whose height follows
//! the source aspect ratio, both dimensions kept even for the encoder.
//! The redraw loop runs at a steady wall-clock cadence and yields between
//! frames.

use crate::capture::backend::RawFrame;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Fixed width of the composited output
pub const TARGET_WIDTH: u32 = 960;

/// One drawn frame at the composited resolution, stamped with the time
/// since the redraw loop started
#[derive(Debug, Clone)]
pub struct CompositedFrame {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub timestamp: Duration,
}

/// Output dimensions for a source of `width` x `height`, scaled to the
/// fixed target width with both dimensions rounded to even
pub fn scaled_dimensions(width: u32, height: u32) -> (u32, u32) {
    scaled_dimensions_for(width, height, TARGET_WIDTH)
}

/// As `scaled_dimensions`, for an arbitrary target width
pub fn scaled_dimensions_for(width: u32, height: u32, target_width: u32) -> (u32, u32) {
    let out_width = round_even(f64::from(target_width));
    let out_height = round_even(f64::from(height) * f64::from(target_width) / f64::from(width));
    (out_width, out_height)
}

/// Nearest even integer, never below 2
fn round_even(value: f64) -> u32 {
    (((value / 2.0).round() as u32) * 2).max(2)
}

/// Nearest-neighbor scale of a tightly packed RGBA buffer
pub(crate) fn scale_rgba(src: &[u8], sw: u32, sh: u32, dw: u32, dh: u32) -> Vec<u8> {
    let mut dst = vec![0u8; (dw * dh * 4) as usize];
    if src.len() < (sw * sh * 4) as usize || sw == 0 || sh == 0 {
        return dst;
    }

    for dy in 0..dh {
        let sy = (u64::from(dy) * u64::from(sh) / u64::from(dh)).min(u64::from(sh) - 1) as u32;
        for dx in 0..dw {
            let sx = (u64::from(dx) * u64::from(sw) / u64::from(dw)).min(u64::from(sw) - 1) as u32;
            let si = ((sy * sw + sx) * 4) as usize;
            let di = ((dy * dw + dx) * 4) as usize;
            dst[di..di + 4].copy_from_slice(&src[si..si + 4]);
        }
    }

    dst
}

/// Continuous redraw loop from a raw frame feed into a composited sink
pub struct Compositor {
    width: u32,
    height: u32,
    frame_rate: u32,
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Compositor {
    /// Size the canvas for a source of the given native resolution
    pub fn new(source_width: u32, source_height: u32, frame_rate: u32) -> Self {
        let (width, height) = scaled_dimensions(source_width, source_height);
        Self {
            width,
            height,
            frame_rate: frame_rate.max(1),
            running: Arc::new(AtomicBool::new(false)),
            handle: None,
        }
    }

    /// Composited output dimensions
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn frame_rate(&self) -> u32 {
        self.frame_rate
    }

    /// Start the redraw loop. Each tick drains the newest raw frame,
    /// redraws the back buffer, and emits one composited frame. When the
    /// source feed ends, the stale back buffer keeps being emitted.
    pub fn start(
        &mut self,
        mut frames: mpsc::Receiver<RawFrame>,
        sink: mpsc::Sender<CompositedFrame>,
    ) {
        let width = self.width;
        let height = self.height;
        let frame_rate = self.frame_rate;
        let running = self.running.clone();
        running.store(true, Ordering::SeqCst);

        self.handle = Some(tokio::spawn(async move {
            let epoch = Instant::now();
            let mut ticker =
                tokio::time::interval(Duration::from_micros(1_000_000 / u64::from(frame_rate)));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            let mut back_buffer: Option<Vec<u8>> = None;
            let mut source_ended = false;

            while running.load(Ordering::SeqCst) {
                ticker.tick().await;

                // Drain to the newest frame; stale intermediates are dropped
                let mut latest = None;
                loop {
                    match frames.try_recv() {
                        Ok(frame) => latest = Some(frame),
                        Err(TryRecvError::Empty) => break,
                        Err(TryRecvError::Disconnected) => {
                            if !source_ended {
                                tracing::warn!(
                                    "video source ended; compositor holding last frame"
                                );
                                source_ended = true;
                            }
                            break;
                        }
                    }
                }

                if let Some(raw) = latest {
                    back_buffer = Some(scale_rgba(&raw.data, raw.width, raw.height, width, height));
                }

                let Some(pixels) = back_buffer.as_ref() else {
                    continue;
                };

                let frame = CompositedFrame {
                    data: pixels.clone(),
                    width,
                    height,
                    timestamp: epoch.elapsed(),
                };
                if sink.send(frame).await.is_err() {
                    break;
                }
            }

            tracing::debug!("compositor loop exited");
        }));
    }

    /// Stop the redraw loop and wait for it to finish
    pub async fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_hd_scales_to_960x540() {
        assert_eq!(scaled_dimensions(1920, 1080), (960, 540));
    }

    #[test]
    fn dimensions_are_always_even_and_aspect_preserving() {
        let sources = [
            (1920u32, 1080u32),
            (1366, 768),
            (1280, 1024),
            (2560, 1440),
            (999, 777),
            (1440, 900),
            (3840, 2160),
            (800, 601),
        ];
        for (w, h) in sources {
            let (ow, oh) = scaled_dimensions(w, h);
            assert_eq!(ow % 2, 0, "{w}x{h} produced odd width {ow}");
            assert_eq!(oh % 2, 0, "{w}x{h} produced odd height {oh}");
            let exact = f64::from(h) * f64::from(ow) / f64::from(w);
            assert!(
                (f64::from(oh) - exact).abs() <= 1.0,
                "{w}x{h} -> {ow}x{oh} drifts from aspect ratio (exact {exact:.2})"
            );
        }
    }

    #[test]
    fn scale_preserves_solid_color() {
        let src = vec![200u8; 2 * 2 * 4];
        let dst = scale_rgba(&src, 2, 2, 4, 4);
        assert_eq!(dst.len(), 4 * 4 * 4);
        assert!(dst.iter().all(|b| *b == 200));
    }

    #[test]
    fn scale_samples_nearest_source_pixel() {
        // left half red, right half blue
        let mut src = vec![0u8; 4 * 1 * 4];
        src[0] = 255;
        src[4] = 255;
        src[8 + 2] = 255;
        src[12 + 2] = 255;
        let dst = scale_rgba(&src, 4, 1, 2, 1);
        assert_eq!(dst[0], 255, "left output pixel should be red");
        assert_eq!(dst[4 + 2], 255, "right output pixel should be blue");
    }

    #[tokio::test]
    async fn compositor_emits_scaled_frames_and_persists_after_source_end() {
        let (raw_tx, raw_rx) = mpsc::channel(4);
        let (sink_tx, mut sink_rx) = mpsc::channel(16);

        let mut compositor = Compositor::new(1920, 1080, 120);
        assert_eq!(compositor.dimensions(), (960, 540));
        compositor.start(raw_rx, sink_tx);

        raw_tx
            .send(RawFrame { data: vec![10u8; 1920 * 1080 * 4], width: 1920, height: 1080 })
            .await
            .unwrap();
        // Source track ends unexpectedly
        drop(raw_tx);

        let first = sink_rx.recv().await.expect("composited frame");
        assert_eq!((first.width, first.height), (960, 540));
        assert_eq!(first.data.len(), 960 * 540 * 4);

        // The stale back buffer keeps arriving after the source is gone
        let next = sink_rx.recv().await.expect("stale frame");
        assert_eq!(next.data, first.data);
        assert!(next.timestamp >= first.timestamp);

        compositor.stop().await;
    }
}
