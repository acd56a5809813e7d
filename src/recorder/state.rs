//! Recording state management
//!
//! Defines the stage-1 state machine, per-attempt session tracking, and
//! the finished intermediate artifact.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Current state of the stage-1 recorder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecorderState {
    /// No recording in progress
    Idle,
    /// Currently encoding the live stream
    Recording,
    /// Flushing the encoder
    Stopping,
    /// Finished; the artifact has been produced or the attempt failed
    Stopped,
}

impl Default for RecorderState {
    fn default() -> Self {
        Self::Idle
    }
}

/// Highest elapsed time the timer display can show
const TIMER_CAP_SECS: u64 = 99 * 60 + 59;

/// Format an elapsed duration as mm:ss for the recording timer.
///
/// The display saturates at 99:59; recording itself is unaffected.
pub fn format_elapsed(elapsed: Duration) -> String {
    let total = elapsed.as_secs().min(TIMER_CAP_SECS);
    format!("{:02}:{:02}", total / 60, total % 60)
}

/// Aggregate state for one recording attempt.
///
/// Created when recording starts; encoded chunks are appended in arrival
/// order until the session is finalized into an artifact or discarded.
#[derive(Debug)]
pub struct RecordingSession {
    id: Uuid,
    started_at: DateTime<Utc>,
    started: Instant,
    chunks: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl RecordingSession {
    pub(crate) fn begin() -> Self {
        Self {
            id: Uuid::new_v4(),
            started_at: Utc::now(),
            started: Instant::now(),
            chunks: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Time since the session started
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Number of chunks appended so far
    pub fn chunk_count(&self) -> usize {
        self.chunks.lock().len()
    }

    /// Shared chunk list, appended to by the chunk collector
    pub(crate) fn chunk_store(&self) -> Arc<Mutex<Vec<Vec<u8>>>> {
        self.chunks.clone()
    }

    /// Concatenate the ordered chunk sequence into the immutable artifact
    pub(crate) fn finalize(self) -> EncodedArtifact {
        let duration = self.started.elapsed();
        let chunks = self.chunks.lock();
        let total: usize = chunks.iter().map(Vec::len).sum();
        let mut data = Vec::with_capacity(total);
        for chunk in chunks.iter() {
            data.extend_from_slice(chunk);
        }
        EncodedArtifact { data, duration }
    }
}

/// The finished intermediate container, immutable once produced
#[derive(Debug, Clone)]
pub struct EncodedArtifact {
    data: Vec<u8>,
    duration: Duration,
}

impl EncodedArtifact {
    /// Container MIME type of the artifact
    pub const MIME_TYPE: &'static str = "video/webm";

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Recorded duration the artifact covers
    pub fn duration(&self) -> Duration {
        self.duration
    }
}
