//! Scoped device ownership
//!
//! `DeviceSource` holds at most one live video handle and one live audio
//! handle. Acquiring a replacement always stops the previous track before
//! the new one is opened, so two live handles to the same physical input
//! never coexist.

use crate::capture::backend::{matching_display, AudioFrame, DeviceBackend, RawFrame};
use crate::capture::types::{AudioDeviceInfo, Bounds, DisplayInfo, MediaSource};
use crate::recorder::encoder::{RecordError, RecordResult};
use std::sync::Arc;
use tokio::sync::mpsc;

pub struct DeviceSource {
    backend: Arc<dyn DeviceBackend>,
    video: Option<MediaSource>,
    audio: Option<MediaSource>,
}

impl DeviceSource {
    pub fn new(backend: Arc<dyn DeviceBackend>) -> Self {
        Self { backend, video: None, audio: None }
    }

    pub fn displays(&self) -> Vec<DisplayInfo> {
        self.backend.displays()
    }

    pub fn audio_inputs(&self) -> Vec<AudioDeviceInfo> {
        self.backend.audio_inputs()
    }

    /// Acquire the screen feed for the display containing `window`, falling
    /// back to the first enumerated display. Any previously held video
    /// track is stopped first.
    pub async fn acquire_video(
        &mut self,
        window: Option<&Bounds>,
    ) -> RecordResult<mpsc::Receiver<RawFrame>> {
        let displays = self.backend.displays();
        let display = match window {
            Some(bounds) => matching_display(bounds, &displays),
            None => displays.first(),
        }
        .ok_or_else(|| RecordError::DeviceUnavailable("no displays enumerated".to_string()))?
        .clone();

        if let Some(old) = self.video.take() {
            old.stop();
        }

        let (source, frames) = self.backend.open_display(&display).await?;
        self.video = Some(source);
        Ok(frames)
    }

    /// Acquire a microphone feed, releasing any previously held audio
    /// track first. `device_id` of `None` selects the platform default.
    pub async fn acquire_audio(
        &mut self,
        device_id: Option<&str>,
    ) -> RecordResult<mpsc::Receiver<AudioFrame>> {
        if let Some(old) = self.audio.take() {
            old.stop();
        }

        let (source, frames) = self.backend.open_audio(device_id).await?;
        self.audio = Some(source);
        Ok(frames)
    }

    pub fn video(&self) -> Option<&MediaSource> {
        self.video.as_ref()
    }

    pub fn audio(&self) -> Option<&MediaSource> {
        self.audio.as_ref()
    }

    /// Stop and release every live handle
    pub fn release(&mut self) {
        if let Some(video) = self.video.take() {
            video.stop();
        }
        if let Some(audio) = self.audio.take() {
            audio.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::synthetic::SyntheticBackend;

    #[tokio::test]
    async fn reacquiring_audio_stops_the_old_track() {
        let backend = Arc::new(SyntheticBackend::new());
        let mut devices = DeviceSource::new(backend);

        let _rx = devices.acquire_audio(None).await.unwrap();
        let first_flag = devices.audio().unwrap().live_flag();
        assert!(devices.audio().unwrap().is_live());

        let _rx2 = devices.acquire_audio(Some("synthetic-mic")).await.unwrap();
        assert!(!first_flag.load(std::sync::atomic::Ordering::SeqCst));
        assert!(devices.audio().unwrap().is_live());

        devices.release();
        assert!(devices.audio().is_none());
    }

    #[tokio::test]
    async fn release_stops_everything() {
        let backend = Arc::new(SyntheticBackend::new());
        let mut devices = DeviceSource::new(backend);

        let _video = devices.acquire_video(None).await.unwrap();
        let _audio = devices.acquire_audio(None).await.unwrap();
        let video_flag = devices.video().unwrap().live_flag();
        let audio_flag = devices.audio().unwrap().live_flag();

        devices.release();
        assert!(!video_flag.load(std::sync::atomic::Ordering::SeqCst));
        assert!(!audio_flag.load(std::sync::atomic::Ordering::SeqCst));
    }
}
