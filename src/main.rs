use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use quickcast::capture::{DeviceBackend, DeviceSource, LevelMeter, NativeBackend, SyntheticBackend};
use quickcast::recorder::ffmpeg_available;
use quickcast::session::{SessionController, SessionEvent, SessionOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "quickcast")]
#[command(author, version, about = "Minimal screen and microphone recorder")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List capture devices in enumeration order
    Devices {
        /// Output as JSON
        #[arg(long)]
        json: bool,

        /// Use the synthetic test-pattern backend instead of real devices
        #[arg(long)]
        synthetic: bool,
    },

    /// Record the screen and microphone into a portable MP4
    Record {
        /// Recording length in seconds; omit to record until Ctrl-C
        #[arg(short, long)]
        duration: Option<u64>,

        /// Audio input device id (default: the platform default input)
        #[arg(long)]
        audio_device: Option<String>,

        /// Output file path (default: recording.mp4 on the Desktop)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Compositor frame rate
        #[arg(long, default_value = "60")]
        frame_rate: u32,

        /// Also keep the intermediate WebM next to the MP4
        #[arg(long)]
        keep_intermediate: bool,

        /// Use the synthetic test-pattern backend instead of real devices
        #[arg(long)]
        synthetic: bool,
    },

    /// Watch the microphone input level
    Monitor {
        /// Audio input device id (default: the platform default input)
        #[arg(long)]
        audio_device: Option<String>,

        /// How long to monitor, in seconds
        #[arg(short, long, default_value = "10")]
        duration: u64,

        /// Use the synthetic test-pattern backend instead of real devices
        #[arg(long)]
        synthetic: bool,
    },
}

fn backend(synthetic: bool) -> Arc<dyn DeviceBackend> {
    if synthetic {
        Arc::new(SyntheticBackend::new())
    } else {
        Arc::new(NativeBackend::new())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    quickcast::init_tracing();

    let cli = Cli::parse();
    match cli.command {
        Commands::Devices { json, synthetic } => list_devices(backend(synthetic), json),
        Commands::Record {
            duration,
            audio_device,
            output,
            frame_rate,
            keep_intermediate,
            synthetic,
        } => {
            let options = SessionOptions {
                window: None,
                audio_device,
                frame_rate,
                output_path: output,
                keep_intermediate,
            };
            record(backend(synthetic), options, duration).await
        }
        Commands::Monitor { audio_device, duration, synthetic } => {
            monitor(backend(synthetic), audio_device, duration).await
        }
    }
}

fn list_devices(backend: Arc<dyn DeviceBackend>, json: bool) -> Result<()> {
    let displays = backend.displays();
    let audio_inputs = backend.audio_inputs();

    if json {
        let listing = serde_json::json!({
            "displays": displays,
            "audioInputs": audio_inputs,
        });
        println!("{}", serde_json::to_string_pretty(&listing)?);
        return Ok(());
    }

    println!("Displays:");
    for display in &displays {
        let primary = if display.is_primary { " (primary)" } else { "" };
        println!(
            "  [{}] {} {}x{}{}",
            display.id,
            display.name,
            display.width(),
            display.height(),
            primary
        );
    }

    println!("Audio inputs:");
    if audio_inputs.is_empty() {
        println!("  (none found)");
    }
    for device in &audio_inputs {
        let default = if device.is_default { " (default)" } else { "" };
        println!("  {}{}", device.name, default);
    }

    Ok(())
}

async fn record(
    backend: Arc<dyn DeviceBackend>,
    options: SessionOptions,
    duration: Option<u64>,
) -> Result<()> {
    if !ffmpeg_available() {
        anyhow::bail!("ffmpeg not found; install FFmpeg and add it to PATH");
    }

    let mut controller = SessionController::new(backend, options);
    let mut events = controller.subscribe();

    // Print the timer in place while the session runs
    let printer = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                SessionEvent::TimerTick(elapsed) => {
                    print!("\rRecording {elapsed} ");
                    let _ = std::io::stdout().flush();
                }
                SessionEvent::Failed(reason) => {
                    eprintln!("\nSession failed: {reason}");
                }
                _ => {}
            }
        }
    });

    controller.start().await.context("failed to start recording")?;
    println!("Recording started. Press Ctrl-C to stop.");

    match duration {
        Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
        None => {
            tokio::signal::ctrl_c()
                .await
                .context("failed to wait for Ctrl-C")?;
        }
    }

    println!("\nStopping...");
    let conversion = controller.stop().await.context("failed to stop recording")?;
    println!("Converting...");

    let output = conversion.wait().await.context("conversion failed")?;
    printer.abort();
    println!("Saved {}", output.display());

    controller.shutdown().await;
    Ok(())
}

async fn monitor(
    backend: Arc<dyn DeviceBackend>,
    audio_device: Option<String>,
    duration: u64,
) -> Result<()> {
    let mut devices = DeviceSource::new(backend);
    let frames = devices
        .acquire_audio(audio_device.as_deref())
        .await
        .context("failed to open the audio input")?;
    let meter = LevelMeter::start(frames);

    println!("Monitoring input level for {duration}s (Ctrl-C to quit)");
    let deadline = tokio::time::Instant::now() + Duration::from_secs(duration);
    let mut ticker = tokio::time::interval(Duration::from_millis(100));
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let level = meter.level();
                let filled = (level * 40.0).round() as usize;
                print!("\r[{:<40}] {:>5.1}%", "#".repeat(filled.min(40)), level * 100.0);
                let _ = std::io::stdout().flush();
            }
            _ = tokio::time::sleep_until(deadline) => break,
            _ = tokio::signal::ctrl_c() => break,
        }
    }
    println!();

    meter.stop();
    devices.release();
    Ok(())
}
