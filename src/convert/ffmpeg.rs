//! FFmpeg conversion pipeline
//!
//! Spools the intermediate artifact to a scratch file and re-encodes it
//! into H.264/AAC MP4 at the job's target path. The external pipeline runs
//! as a child process; callers observe completion by awaiting `convert`.

use crate::convert::types::{ConversionError, ConversionJob, ConversionSettings};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;

/// File name of the final artifact at the default output location
pub const OUTPUT_FILE_NAME: &str = "recording.mp4";

/// Default output location: `recording.mp4` on the user's Desktop,
/// falling back to the current directory
pub fn default_output_path() -> PathBuf {
    let home = std::env::var_os("HOME").or_else(|| std::env::var_os("USERPROFILE"));
    if let Some(home) = home {
        let desktop = Path::new(&home).join("Desktop");
        if desktop.is_dir() {
            return desktop.join(OUTPUT_FILE_NAME);
        }
    }
    PathBuf::from(OUTPUT_FILE_NAME)
}

/// FFmpeg argument list for one conversion job. `-y` makes repeated runs
/// silently overwrite the previous output.
fn convert_args(input: &Path, settings: &ConversionSettings, output: &Path) -> Vec<String> {
    vec![
        "-y".to_string(),
        "-hide_banner".to_string(),
        "-loglevel".to_string(),
        "error".to_string(),
        "-i".to_string(),
        input.to_string_lossy().to_string(),
        "-vf".to_string(),
        settings.scale_filter.clone(),
        "-c:v".to_string(),
        settings.video_codec.clone(),
        "-preset".to_string(),
        "veryfast".to_string(),
        "-pix_fmt".to_string(),
        "yuv420p".to_string(),
        "-c:a".to_string(),
        settings.audio_codec.clone(),
        "-b:a".to_string(),
        "192k".to_string(),
        "-movflags".to_string(),
        "+faststart".to_string(),
        output.to_string_lossy().to_string(),
    ]
}

/// Run a conversion job to completion.
///
/// The artifact is written to a scratch file first and the external
/// pipeline re-encodes it to the job's output path, overwriting whatever
/// is there. On success the scratch file is removed and the output path
/// returned; on failure the scratch input is kept for inspection and the
/// encoder's diagnostic is propagated. The output file only appears once
/// the pipeline reports success.
pub async fn convert(job: ConversionJob) -> Result<PathBuf, ConversionError> {
    if job.artifact.is_empty() {
        return Err(ConversionError::EmptyArtifact);
    }

    let scratch = tempfile::Builder::new()
        .prefix("recording-")
        .suffix(".webm")
        .tempfile()?;
    std::fs::write(scratch.path(), job.artifact.as_bytes())?;

    if let Some(parent) = job.output_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let args = convert_args(scratch.path(), &job.settings, &job.output_path);
    tracing::info!("starting conversion: ffmpeg {:?}", args);

    let output = Command::new("ffmpeg")
        .args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|e| ConversionError::Ffmpeg(format!("failed to start ffmpeg: {e}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        match scratch.keep() {
            Ok((_, path)) => {
                tracing::error!("conversion failed; scratch input kept at {}", path.display());
            }
            Err(e) => tracing::warn!("failed to keep scratch input: {}", e),
        }
        return Err(ConversionError::Ffmpeg(if stderr.is_empty() {
            format!("ffmpeg exited with {}", output.status)
        } else {
            stderr
        }));
    }

    tracing::info!("conversion complete: {}", job.output_path.display());
    Ok(job.output_path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn convert_args_apply_the_fixed_filter_chain() {
        let settings = ConversionSettings::default();
        let args = convert_args(
            Path::new("/tmp/recording-abc.webm"),
            &settings,
            Path::new("/home/user/Desktop/recording.mp4"),
        );

        let joined = args.join(" ");
        assert!(joined.starts_with("-y "), "overwrite must be unconditional");
        assert!(joined.contains("-c:v libx264"));
        assert!(joined.contains("-c:a aac"));
        assert!(joined.contains("-vf scale=trunc(iw/2)*2:trunc(ih/2)*2"));
        assert!(joined.contains("-pix_fmt yuv420p"));
        assert_eq!(args.last().unwrap(), "/home/user/Desktop/recording.mp4");
    }

    #[test]
    fn default_output_is_deterministic() {
        assert_eq!(default_output_path(), default_output_path());
        assert!(default_output_path().to_string_lossy().ends_with(OUTPUT_FILE_NAME));
    }

    #[tokio::test]
    async fn empty_artifact_is_rejected() {
        let artifact = crate::recorder::RecordingSession::begin().finalize();
        let job = ConversionJob::new(artifact, PathBuf::from("out.mp4"));
        let err = convert(job).await.unwrap_err();
        assert!(matches!(err, ConversionError::EmptyArtifact));
    }
}
