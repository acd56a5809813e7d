//! Stream muxing
//!
//! Combines the compositor's frame sequence and the live microphone feed
//! into one two-track stream for the recorder. Pure composition: nothing
//! is transformed, and nothing is buffered beyond the track channels
//! themselves.

use crate::capture::backend::AudioFrame;
use crate::capture::types::MediaSource;
use crate::compositor::CompositedFrame;
use crate::recorder::encoder::{RecordError, RecordResult};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Video track parameters of a muxed stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoFormat {
    pub width: u32,
    pub height: u32,
    pub frame_rate: u32,
}

/// Audio track parameters of a muxed stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

/// Both track formats together
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamFormat {
    pub video: VideoFormat,
    pub audio: AudioFormat,
}

/// One time-aligned stream exposing a video track and an audio track
#[derive(Debug)]
pub struct MuxedStream {
    format: StreamFormat,
    video: mpsc::Receiver<CompositedFrame>,
    audio: mpsc::Receiver<AudioFrame>,
}

impl MuxedStream {
    pub fn format(&self) -> StreamFormat {
        self.format
    }

    /// Take the two track receivers, for an encoder to consume
    pub fn split(self) -> (mpsc::Receiver<CompositedFrame>, mpsc::Receiver<AudioFrame>) {
        (self.video, self.audio)
    }
}

/// Owns the frame-buffer sink the pipeline writes into and hands out the
/// combined stream once both tracks are live
pub struct StreamMuxer {
    format: StreamFormat,
    video_tx: mpsc::Sender<CompositedFrame>,
    audio_tx: mpsc::Sender<AudioFrame>,
    video_rx: mpsc::Receiver<CompositedFrame>,
    audio_rx: mpsc::Receiver<AudioFrame>,
}

impl StreamMuxer {
    /// Create a muxer with track buffers sized for roughly one second
    pub fn new(video: VideoFormat, audio: AudioFormat) -> Self {
        let (video_tx, video_rx) = mpsc::channel(video.frame_rate.max(1) as usize * 2);
        let (audio_tx, audio_rx) = mpsc::channel(128);
        Self {
            format: StreamFormat { video, audio },
            video_tx,
            audio_tx,
            video_rx,
            audio_rx,
        }
    }

    /// Sink for composited frames
    pub fn video_sink(&self) -> mpsc::Sender<CompositedFrame> {
        self.video_tx.clone()
    }

    /// Sink for audio sample blocks
    pub fn audio_sink(&self) -> mpsc::Sender<AudioFrame> {
        self.audio_tx.clone()
    }

    /// Combine both tracks into one stream.
    ///
    /// Ordering precondition: both source handles must be live. Audio
    /// acquisition and compositor setup happen before this call.
    pub fn combine(self, video: &MediaSource, audio: &MediaSource) -> RecordResult<MuxedStream> {
        if !video.is_live() {
            return Err(RecordError::SourceNotReady("video"));
        }
        if !audio.is_live() {
            return Err(RecordError::SourceNotReady("audio"));
        }

        tracing::debug!(
            "muxed stream assembled: {}x{} @ {}fps + {}Hz/{}ch",
            self.format.video.width,
            self.format.video.height,
            self.format.video.frame_rate,
            self.format.audio.sample_rate,
            self.format.audio.channels
        );

        Ok(MuxedStream {
            format: self.format,
            video: self.video_rx,
            audio: self.audio_rx,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::types::{SourceFormat, MediaSource};

    fn formats() -> (VideoFormat, AudioFormat) {
        (
            VideoFormat { width: 960, height: 540, frame_rate: 60 },
            AudioFormat { sample_rate: 48_000, channels: 1 },
        )
    }

    #[test]
    fn combine_requires_both_tracks_live() {
        let (video_fmt, audio_fmt) = formats();
        let video = MediaSource::new(SourceFormat::Video { width: 1920, height: 1080 }, "screen");
        let audio = MediaSource::new(SourceFormat::Audio { sample_rate: 48_000, channels: 1 }, "mic");

        audio.stop();
        let muxer = StreamMuxer::new(video_fmt, audio_fmt);
        let err = muxer.combine(&video, &audio).unwrap_err();
        assert!(matches!(err, RecordError::SourceNotReady("audio")));

        let audio = MediaSource::new(SourceFormat::Audio { sample_rate: 48_000, channels: 1 }, "mic");
        video.stop();
        let muxer = StreamMuxer::new(video_fmt, audio_fmt);
        let err = muxer.combine(&video, &audio).unwrap_err();
        assert!(matches!(err, RecordError::SourceNotReady("video")));
    }

    #[tokio::test]
    async fn combined_stream_carries_both_tracks() {
        let (video_fmt, audio_fmt) = formats();
        let video = MediaSource::new(SourceFormat::Video { width: 1920, height: 1080 }, "screen");
        let audio = MediaSource::new(SourceFormat::Audio { sample_rate: 48_000, channels: 1 }, "mic");

        let muxer = StreamMuxer::new(video_fmt, audio_fmt);
        let video_sink = muxer.video_sink();
        let audio_sink = muxer.audio_sink();
        let stream = muxer.combine(&video, &audio).unwrap();
        assert_eq!(stream.format().video.width, 960);

        video_sink
            .send(crate::compositor::CompositedFrame {
                data: vec![0; 4],
                width: 1,
                height: 1,
                timestamp: std::time::Duration::ZERO,
            })
            .await
            .unwrap();
        audio_sink
            .send(AudioFrame { samples: vec![0; 8], sample_rate: 48_000, channels: 1 })
            .await
            .unwrap();

        let (mut v, mut a) = stream.split();
        assert!(v.recv().await.is_some());
        assert!(a.recv().await.is_some());
    }
}
