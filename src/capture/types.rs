//! Capture source type definitions
//!
//! Platform-agnostic descriptions of displays and audio inputs, plus the
//! live handles handed out when a device is opened.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use uuid::Uuid;

/// Kind of captured signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Video,
    Audio,
}

/// A rectangle in global desktop coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bounds {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Bounds {
    pub fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    /// Whether `other` lies fully within this rectangle
    pub fn contains(&self, other: &Bounds) -> bool {
        let right = self.x as i64 + self.width as i64;
        let bottom = self.y as i64 + self.height as i64;
        other.x as i64 >= self.x as i64
            && other.y as i64 >= self.y as i64
            && other.x as i64 + other.width as i64 <= right
            && other.y as i64 + other.height as i64 <= bottom
    }
}

/// Information about a display/screen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisplayInfo {
    /// Unique display ID
    pub id: u32,

    /// Display name
    pub name: String,

    /// Position and size in global desktop coordinates
    pub bounds: Bounds,

    /// Whether this is the primary display
    pub is_primary: bool,

    /// Refresh rate in Hz (if available)
    pub refresh_rate: Option<u32>,
}

impl DisplayInfo {
    pub fn width(&self) -> u32 {
        self.bounds.width
    }

    pub fn height(&self) -> u32 {
        self.bounds.height
    }
}

/// Information about an audio input device
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioDeviceInfo {
    /// Unique device ID
    pub id: String,

    /// Device name
    pub name: String,

    /// Whether this is the default input device
    pub is_default: bool,
}

/// Native format of a captured signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SourceFormat {
    Video { width: u32, height: u32 },
    Audio { sample_rate: u32, channels: u16 },
}

/// A live, revocable handle to one captured signal.
///
/// The producer behind the handle keeps delivering data until `stop()` is
/// called or the handle is dropped. Exactly one handle exists per open
/// device track.
#[derive(Debug)]
pub struct MediaSource {
    format: SourceFormat,
    track_id: Uuid,
    label: String,
    live: Arc<AtomicBool>,
}

impl MediaSource {
    pub(crate) fn new(format: SourceFormat, label: impl Into<String>) -> Self {
        Self::from_parts(format, label, Arc::new(AtomicBool::new(true)))
    }

    /// Build a handle around a liveness flag that already belongs to a
    /// running producer
    pub(crate) fn from_parts(
        format: SourceFormat,
        label: impl Into<String>,
        live: Arc<AtomicBool>,
    ) -> Self {
        Self {
            format,
            track_id: Uuid::new_v4(),
            label: label.into(),
            live,
        }
    }

    /// Liveness flag shared with the producer task; cleared on stop
    pub(crate) fn live_flag(&self) -> Arc<AtomicBool> {
        self.live.clone()
    }

    pub fn kind(&self) -> SourceKind {
        match self.format {
            SourceFormat::Video { .. } => SourceKind::Video,
            SourceFormat::Audio { .. } => SourceKind::Audio,
        }
    }

    pub fn format(&self) -> SourceFormat {
        self.format
    }

    /// Native resolution for video sources
    pub fn video_dimensions(&self) -> Option<(u32, u32)> {
        match self.format {
            SourceFormat::Video { width, height } => Some((width, height)),
            SourceFormat::Audio { .. } => None,
        }
    }

    /// Native sample rate and channel count for audio sources
    pub fn audio_format(&self) -> Option<(u32, u16)> {
        match self.format {
            SourceFormat::Audio { sample_rate, channels } => Some((sample_rate, channels)),
            SourceFormat::Video { .. } => None,
        }
    }

    pub fn track_id(&self) -> Uuid {
        self.track_id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Whether the underlying track is still delivering data
    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    /// Stop the underlying device track. Idempotent.
    pub fn stop(&self) {
        if self.live.swap(false, Ordering::SeqCst) {
            tracing::debug!("stopped {} track {}", self.label, self.track_id);
        }
    }
}

impl Drop for MediaSource {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounds_contains_inner_rect() {
        let display = Bounds::new(0, 0, 1920, 1080);
        assert!(display.contains(&Bounds::new(100, 100, 320, 400)));
        assert!(display.contains(&Bounds::new(0, 0, 1920, 1080)));
    }

    #[test]
    fn bounds_rejects_overlap_and_outside() {
        let display = Bounds::new(0, 0, 1920, 1080);
        // hangs off the right edge
        assert!(!display.contains(&Bounds::new(1800, 100, 320, 400)));
        // entirely on another display
        assert!(!display.contains(&Bounds::new(2000, 0, 320, 400)));
        // negative origin
        assert!(!display.contains(&Bounds::new(-10, 10, 320, 400)));
    }

    #[test]
    fn source_stop_clears_liveness() {
        let source = MediaSource::new(SourceFormat::Audio { sample_rate: 48_000, channels: 1 }, "mic");
        let flag = source.live_flag();
        assert!(source.is_live());
        source.stop();
        assert!(!source.is_live());
        assert!(!flag.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[test]
    fn dropping_a_source_stops_the_track() {
        let source = MediaSource::new(SourceFormat::Video { width: 1920, height: 1080 }, "screen");
        let flag = source.live_flag();
        drop(source);
        assert!(!flag.load(std::sync::atomic::Ordering::SeqCst));
    }
}
