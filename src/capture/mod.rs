//! Capture sources
//!
//! Device enumeration and acquisition for the screen and microphone feeds,
//! behind a backend trait so the pipeline is independent of the platform
//! layer.

pub mod audio;
pub mod backend;
pub mod level;
pub mod screen;
pub mod source;
pub mod synthetic;
pub mod types;

pub use backend::{matching_display, AudioFrame, DeviceBackend, NativeBackend, RawFrame};
pub use level::LevelMeter;
pub use source::DeviceSource;
pub use synthetic::SyntheticBackend;
pub use types::{AudioDeviceInfo, Bounds, DisplayInfo, MediaSource, SourceFormat, SourceKind};
