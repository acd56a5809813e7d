//! Device backend abstraction
//!
//! A `DeviceBackend` hides the platform layer behind enumeration and
//! acquisition calls, so the rest of the pipeline only ever sees live
//! `MediaSource` handles and the channels their samples arrive on.

use crate::capture::types::{AudioDeviceInfo, Bounds, DisplayInfo, MediaSource};
use crate::recorder::encoder::RecordResult;
use async_trait::async_trait;
use tokio::sync::mpsc;

/// One raw video frame as delivered by a device backend (tightly packed RGBA)
#[derive(Debug, Clone)]
pub struct RawFrame {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

/// A block of interleaved PCM samples from an audio source
#[derive(Debug, Clone)]
pub struct AudioFrame {
    /// Raw audio samples (i16 PCM, interleaved)
    pub samples: Vec<i16>,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Number of channels
    pub channels: u16,
}

/// Capture device backend
///
/// Enumeration order is the platform's enumeration order; it is meaningful
/// for listing but carries no other guarantee. Acquisition returns a live
/// handle plus the channel its frames arrive on; the channel closes when
/// the track ends or the handle is stopped.
#[async_trait]
pub trait DeviceBackend: Send + Sync {
    /// Enumerate displays
    fn displays(&self) -> Vec<DisplayInfo>;

    /// Enumerate audio input devices
    fn audio_inputs(&self) -> Vec<AudioDeviceInfo>;

    /// Open a live video feed for the given display
    async fn open_display(
        &self,
        display: &DisplayInfo,
    ) -> RecordResult<(MediaSource, mpsc::Receiver<RawFrame>)>;

    /// Open a live audio feed; `device_id` of `None` selects the platform
    /// default input
    async fn open_audio(
        &self,
        device_id: Option<&str>,
    ) -> RecordResult<(MediaSource, mpsc::Receiver<AudioFrame>)>;
}

/// Find the display whose bounds fully contain `window`.
///
/// Falls back to the first enumerated display when no display contains the
/// window; ties resolve in enumeration order.
pub fn matching_display<'a>(window: &Bounds, displays: &'a [DisplayInfo]) -> Option<&'a DisplayInfo> {
    displays
        .iter()
        .find(|display| display.bounds.contains(window))
        .or_else(|| displays.first())
}

/// Backend for the machine's real devices: FFmpeg grab input for the
/// screen, cpal for the microphone.
///
/// Display geometry is not probed from the OS; the capture region defaults
/// to a 1920x1080 primary display and can be overridden.
pub struct NativeBackend {
    display: DisplayInfo,
    frame_rate: u32,
}

impl NativeBackend {
    pub fn new() -> Self {
        Self {
            display: DisplayInfo {
                id: 0,
                name: "Primary Display".to_string(),
                bounds: Bounds::new(0, 0, 1920, 1080),
                is_primary: true,
                refresh_rate: Some(60),
            },
            frame_rate: 30,
        }
    }

    /// Override the capture region for the primary display
    pub fn with_display_size(mut self, width: u32, height: u32) -> Self {
        self.display.bounds.width = width;
        self.display.bounds.height = height;
        self
    }

    /// Override the grab frame rate
    pub fn with_frame_rate(mut self, frame_rate: u32) -> Self {
        self.frame_rate = frame_rate.max(1);
        self
    }
}

impl Default for NativeBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DeviceBackend for NativeBackend {
    fn displays(&self) -> Vec<DisplayInfo> {
        vec![self.display.clone()]
    }

    fn audio_inputs(&self) -> Vec<AudioDeviceInfo> {
        super::audio::audio_input_devices()
    }

    async fn open_display(
        &self,
        display: &DisplayInfo,
    ) -> RecordResult<(MediaSource, mpsc::Receiver<RawFrame>)> {
        super::screen::open_grab(display, self.frame_rate).await
    }

    async fn open_audio(
        &self,
        device_id: Option<&str>,
    ) -> RecordResult<(MediaSource, mpsc::Receiver<AudioFrame>)> {
        super::audio::open_microphone(device_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn display(id: u32, x: i32, width: u32, height: u32) -> DisplayInfo {
        DisplayInfo {
            id,
            name: format!("Display {id}"),
            bounds: Bounds::new(x, 0, width, height),
            is_primary: id == 0,
            refresh_rate: Some(60),
        }
    }

    #[test]
    fn picks_the_display_containing_the_window() {
        // window sits on display B even though A enumerates first
        let displays = vec![display(0, 0, 1920, 1080), display(1, 1920, 2560, 1440)];
        let window = Bounds::new(2200, 300, 320, 400);
        let chosen = matching_display(&window, &displays).unwrap();
        assert_eq!(chosen.id, 1);
    }

    #[test]
    fn falls_back_to_first_display_without_a_match() {
        let displays = vec![display(0, 0, 1920, 1080), display(1, 1920, 2560, 1440)];
        // straddles the seam between the two displays
        let window = Bounds::new(1800, 300, 320, 400);
        let chosen = matching_display(&window, &displays).unwrap();
        assert_eq!(chosen.id, 0);
    }

    #[test]
    fn no_displays_yields_none() {
        let window = Bounds::new(0, 0, 100, 100);
        assert!(matching_display(&window, &[]).is_none());
    }
}
