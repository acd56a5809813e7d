//! quickcast - minimal screen and microphone recorder.
//!
//! Captures a live screen feed and a microphone feed, composites them into
//! one synchronized stream, encodes it incrementally into a WebM
//! intermediate, and converts the result into a portable H.264/AAC MP4.

pub mod capture;
pub mod compositor;
pub mod convert;
pub mod mux;
pub mod recorder;
pub mod session;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize tracing/logging for the binary
pub fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "quickcast=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
