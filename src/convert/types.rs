//! Conversion types and configuration
//!
//! Types for the stage-2 transcode: job description, codec parameters,
//! and error handling.

use crate::recorder::EncodedArtifact;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Conversion errors
#[derive(Error, Debug)]
pub enum ConversionError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("ffmpeg error: {0}")]
    Ffmpeg(String),

    #[error("artifact is empty")]
    EmptyArtifact,
}

/// Codec parameters for one conversion job
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversionSettings {
    /// Target video codec
    pub video_codec: String,

    /// Target audio codec
    pub audio_codec: String,

    /// Scaling filter; keeps both output dimensions even, as the target
    /// codec's chroma subsampling requires
    pub scale_filter: String,
}

impl Default for ConversionSettings {
    fn default() -> Self {
        Self {
            video_codec: "libx264".to_string(),
            audio_codec: "aac".to_string(),
            scale_filter: "scale=trunc(iw/2)*2:trunc(ih/2)*2".to_string(),
        }
    }
}

/// One transcode request: a finished intermediate artifact plus the target
/// path and codec parameters.
///
/// A job consumes its artifact; one job runs per recorded artifact.
#[derive(Debug)]
pub struct ConversionJob {
    pub artifact: EncodedArtifact,
    pub output_path: PathBuf,
    pub settings: ConversionSettings,
}

impl ConversionJob {
    pub fn new(artifact: EncodedArtifact, output_path: PathBuf) -> Self {
        Self {
            artifact,
            output_path,
            settings: ConversionSettings::default(),
        }
    }

    pub fn with_settings(mut self, settings: ConversionSettings) -> Self {
        self.settings = settings;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_settings_target_the_portable_pairing() {
        let settings = ConversionSettings::default();
        assert_eq!(settings.video_codec, "libx264");
        assert_eq!(settings.audio_codec, "aac");
        assert!(settings.scale_filter.contains("trunc(iw/2)*2"));
        assert!(settings.scale_filter.contains("trunc(ih/2)*2"));
    }
}
