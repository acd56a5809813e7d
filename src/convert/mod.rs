//! Stage-2 conversion
//!
//! Re-encodes a finished intermediate artifact into the portable
//! H.264/AAC MP4 delivery format via the external FFmpeg pipeline.

pub mod ffmpeg;
pub mod types;

pub use ffmpeg::{convert, default_output_path, OUTPUT_FILE_NAME};
pub use types::{ConversionError, ConversionJob, ConversionSettings};
