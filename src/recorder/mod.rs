//! Stage-1 recording
//!
//! The `Recorder` drives an incremental encoder over the muxed stream:
//! `idle → recording → stopping → stopped`. Encoded chunks are appended
//! to the session in arrival order; `stop` flushes the encoder and
//! finalizes the chunk sequence into one immutable artifact.

pub mod encoder;
pub mod state;

pub use encoder::{ffmpeg_available, RecordError, RecordResult, StreamEncoder, VpxEncoder};
pub use state::{format_elapsed, EncodedArtifact, RecorderState, RecordingSession};

use crate::mux::MuxedStream;
use tokio::task::JoinHandle;

pub struct Recorder {
    state: RecorderState,
    encoder: Box<dyn StreamEncoder>,
    session: Option<RecordingSession>,
    collector: Option<JoinHandle<()>>,
}

impl Recorder {
    /// Recorder over the production VP9/WebM encoder
    pub fn new() -> Self {
        Self::with_encoder(Box::new(VpxEncoder::new()))
    }

    /// Recorder over a caller-provided encoder
    pub fn with_encoder(encoder: Box<dyn StreamEncoder>) -> Self {
        Self {
            state: RecorderState::Idle,
            encoder,
            session: None,
            collector: None,
        }
    }

    pub fn state(&self) -> RecorderState {
        self.state
    }

    /// The active session, while one exists
    pub fn session(&self) -> Option<&RecordingSession> {
        self.session.as_ref()
    }

    /// Formatted mm:ss timer for the active session
    pub fn timer_display(&self) -> Option<String> {
        self.session.as_ref().map(|s| format_elapsed(s.elapsed()))
    }

    /// Start encoding the muxed stream.
    ///
    /// Fails with `AlreadyRecording` unless the recorder is idle; the
    /// machine has no restart edge, a new attempt gets a new recorder.
    pub async fn start(&mut self, stream: MuxedStream) -> RecordResult<()> {
        if self.state != RecorderState::Idle {
            return Err(RecordError::AlreadyRecording);
        }

        let mut chunks = self.encoder.start(stream).await?;
        let session = RecordingSession::begin();
        let store = session.chunk_store();

        // Chunks land in arrival order; order is the only guarantee
        self.collector = Some(tokio::spawn(async move {
            while let Some(chunk) = chunks.recv().await {
                store.lock().push(chunk);
            }
        }));

        tracing::info!("recording started: session {}", session.id());
        self.session = Some(session);
        self.state = RecorderState::Recording;
        Ok(())
    }

    /// Stop recording: flush the encoder, drain the remaining chunks, and
    /// finalize the session into the intermediate artifact.
    ///
    /// Fails with `NotRecording` unless currently recording. On an encoder
    /// failure the session is discarded and no artifact is produced.
    pub async fn stop(&mut self) -> RecordResult<EncodedArtifact> {
        if self.state != RecorderState::Recording {
            return Err(RecordError::NotRecording);
        }
        self.state = RecorderState::Stopping;

        let flush = self.encoder.finish().await;

        // The chunk channel closes once the final fragment is out
        if let Some(collector) = self.collector.take() {
            let _ = collector.await;
        }

        let session = self.session.take().ok_or(RecordError::NotRecording)?;
        self.state = RecorderState::Stopped;

        if let Err(e) = flush {
            tracing::error!("encoder failed; discarding session {}: {}", session.id(), e);
            return Err(e);
        }

        let artifact = session.finalize();
        tracing::info!(
            "recording stopped: {} bytes of {} over {}",
            artifact.len(),
            EncodedArtifact::MIME_TYPE,
            format_elapsed(artifact.duration())
        );
        Ok(artifact)
    }
}

impl Default for Recorder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::types::{MediaSource, SourceFormat};
    use crate::mux::{AudioFormat, StreamMuxer, VideoFormat};
    use async_trait::async_trait;
    use tokio::sync::mpsc;

    /// Encoder that emits a fixed chunk script and ignores the stream
    struct ScriptedEncoder {
        script: Vec<Vec<u8>>,
        fail_on_finish: bool,
    }

    impl ScriptedEncoder {
        fn new(script: Vec<Vec<u8>>) -> Self {
            Self { script, fail_on_finish: false }
        }

        fn failing() -> Self {
            Self { script: vec![b"junk".to_vec()], fail_on_finish: true }
        }
    }

    #[async_trait]
    impl StreamEncoder for ScriptedEncoder {
        async fn start(&mut self, stream: MuxedStream) -> RecordResult<mpsc::Receiver<Vec<u8>>> {
            let (tx, rx) = mpsc::channel(16);
            let script = self.script.clone();
            let (mut video, mut audio) = stream.split();
            tokio::spawn(async move {
                for chunk in script {
                    if tx.send(chunk).await.is_err() {
                        return;
                    }
                }
                // Hold the stream open until both tracks close
                while video.recv().await.is_some() {}
                while audio.recv().await.is_some() {}
            });
            Ok(rx)
        }

        async fn finish(&mut self) -> RecordResult<()> {
            if self.fail_on_finish {
                return Err(RecordError::Encoding("scripted failure".to_string()));
            }
            Ok(())
        }
    }

    fn muxed_stream() -> MuxedStream {
        let video = MediaSource::new(SourceFormat::Video { width: 1920, height: 1080 }, "screen");
        let audio = MediaSource::new(SourceFormat::Audio { sample_rate: 48_000, channels: 1 }, "mic");
        let muxer = StreamMuxer::new(
            VideoFormat { width: 960, height: 540, frame_rate: 60 },
            AudioFormat { sample_rate: 48_000, channels: 1 },
        );
        muxer.combine(&video, &audio).unwrap()
    }

    #[tokio::test]
    async fn artifact_is_ordered_chunk_concatenation() {
        let script = vec![b"C1".to_vec(), b"C2".to_vec(), b"C3".to_vec(), b"C4".to_vec()];
        let mut recorder = Recorder::with_encoder(Box::new(ScriptedEncoder::new(script)));

        recorder.start(muxed_stream()).await.unwrap();
        assert_eq!(recorder.state(), RecorderState::Recording);
        assert!(recorder.timer_display().is_some());

        // Give the script time to deliver
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        let artifact = recorder.stop().await.unwrap();
        assert_eq!(recorder.state(), RecorderState::Stopped);
        assert_eq!(artifact.as_bytes(), b"C1C2C3C4");
    }

    #[tokio::test]
    async fn starting_twice_is_already_recording() {
        let mut recorder = Recorder::with_encoder(Box::new(ScriptedEncoder::new(vec![])));
        recorder.start(muxed_stream()).await.unwrap();

        let err = recorder.start(muxed_stream()).await.unwrap_err();
        assert!(matches!(err, RecordError::AlreadyRecording));
        // The running session is untouched
        assert_eq!(recorder.state(), RecorderState::Recording);
        assert!(recorder.session().is_some());
    }

    #[tokio::test]
    async fn stopping_while_idle_is_not_recording() {
        let mut recorder = Recorder::with_encoder(Box::new(ScriptedEncoder::new(vec![])));
        let err = recorder.stop().await.unwrap_err();
        assert!(matches!(err, RecordError::NotRecording));
        assert_eq!(recorder.state(), RecorderState::Idle);
    }

    #[tokio::test]
    async fn encoder_failure_discards_the_session() {
        let mut recorder = Recorder::with_encoder(Box::new(ScriptedEncoder::failing()));
        recorder.start(muxed_stream()).await.unwrap();

        let err = recorder.stop().await.unwrap_err();
        assert!(matches!(err, RecordError::Encoding(_)));
        assert!(recorder.session().is_none());
        assert_eq!(recorder.state(), RecorderState::Stopped);
    }
}
