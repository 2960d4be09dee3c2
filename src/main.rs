//! adbblitz CLI
//!
//! Command-line interface for capturing from a device and inspecting the
//! generated remote command.

use adbblitz::{
    command::{decode_payload, encode_command, recording_script, CommandOptions},
    config::CaptureConfig,
    platform::{self, ConsoleEvent},
    types::{Frame, FrameFormat, Resolution},
    ScreenCapture,
};
use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

#[derive(Parser)]
#[command(name = "adbblitz")]
#[command(about = "Continuous Android screen capture over adb screenrecord")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Options shared by every command that talks to a device
#[derive(Args, Debug, Default)]
struct DeviceArgs {
    /// TOML config file; flags below override it
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Path to the adb executable
    #[arg(long)]
    adb: Option<PathBuf>,

    /// Device serial (e.g. emulator-5554 or 127.0.0.1:5555)
    #[arg(short, long)]
    serial: Option<String>,

    /// screenrecord segment length in seconds (1-180)
    #[arg(short, long)]
    time_limit: Option<u32>,

    /// Output resolution (e.g., 1600x900)
    #[arg(short, long)]
    resolution: Option<Resolution>,

    /// screenrecord bit rate (e.g., 20M)
    #[arg(short, long)]
    bitrate: Option<String>,

    /// Decode the command payload with busybox on the device
    #[arg(long)]
    busybox: bool,
}

impl DeviceArgs {
    fn load(&self) -> anyhow::Result<CaptureConfig> {
        let mut config = match &self.config {
            Some(path) => CaptureConfig::load(path)
                .with_context(|| format!("Failed to load {}", path.display()))?,
            None => CaptureConfig::default(),
        };

        if let Some(adb) = &self.adb {
            config.adb_path = adb.clone();
        }
        if let Some(serial) = &self.serial {
            config.device_serial = serial.clone();
        }
        if let Some(secs) = self.time_limit {
            config.time_limit_secs = secs;
        }
        if let Some(resolution) = self.resolution {
            config.resolution = resolution;
        }
        if let Some(bitrate) = &self.bitrate {
            config.bitrate = bitrate.clone();
        }
        if self.busybox {
            config.use_busybox = true;
        }
        Ok(config)
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Capture frames from a device
    Capture {
        #[command(flatten)]
        device: DeviceArgs,

        /// Stop after this many seconds (default: until Ctrl+C)
        #[arg(short, long)]
        duration: Option<f64>,

        /// Write the last frame to this file as binary PPM
        #[arg(long)]
        snapshot: Option<PathBuf>,

        /// Frames kept in the ring buffer
        #[arg(long)]
        buffer: Option<usize>,

        /// Sleep after a repeated frame, in milliseconds
        #[arg(long)]
        idle_sleep_ms: Option<u64>,

        /// Output pixel format (bgr24, rgb24, bgra, rgba)
        #[arg(long)]
        format: Option<FrameFormat>,

        /// Skip `adb connect` before starting
        #[arg(long)]
        no_connect: bool,
    },

    /// Print the command line sent to `adb shell`
    Script {
        #[command(flatten)]
        device: DeviceArgs,

        /// Also print the decoded script
        #[arg(long)]
        decode: bool,
    },

    /// Print the default configuration as TOML
    Config,

    /// Raise a console control event in another process's console
    #[command(name = "console-ctrl", hide = true)]
    ConsoleCtrl {
        pid: u32,

        /// 0 = Ctrl+C, 1 = Ctrl+Break
        #[arg(default_value = "0")]
        event: u32,
    },
}

fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("adbblitz=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Capture {
            device,
            duration,
            snapshot,
            buffer,
            idle_sleep_ms,
            format,
            no_connect,
        } => {
            let mut config = device.load()?;
            if let Some(capacity) = buffer {
                config.buffer_capacity = capacity;
            }
            if let Some(ms) = idle_sleep_ms {
                config.idle_sleep_ms = ms;
            }
            if let Some(format) = format {
                config.pixel_format = format;
            }
            if no_connect {
                config.connect_to_device = false;
            }
            cmd_capture(config, duration, snapshot)
        }
        Commands::Script { device, decode } => cmd_script(device.load()?, decode),
        Commands::Config => cmd_config(),
        Commands::ConsoleCtrl { pid, event } => cmd_console_ctrl(pid, event),
    }
}

fn cmd_capture(mut config: CaptureConfig, duration: Option<f64>, snapshot: Option<PathBuf>) -> anyhow::Result<()> {
    // This binary implements `console-ctrl` itself
    if config.console_helper.is_none() {
        config.console_helper = Some(std::env::current_exe().context("Failed to locate adbblitz")?);
    }

    println!("Starting capture...\n");
    println!("Configuration:");
    println!("  Device: {}", config.device_serial);
    println!("  Resolution: {}", config.resolution);
    println!("  Bitrate: {}", config.bitrate);
    println!("  Segment: {}s", config.effective_time_limit());
    println!();

    let mut capture = ScreenCapture::new(config)?;
    let mut frames = capture.start()?;

    let stop = frames.stop_handle();
    ctrlc::set_handler({
        let stop = stop.clone();
        move || {
            stop.request_stop();
        }
    })?;

    if let Some(secs) = duration {
        let stop = stop.clone();
        let limit = Duration::from_secs_f64(secs.max(0.0));
        std::thread::Builder::new()
            .name("adbblitz-timer".into())
            .spawn(move || {
                std::thread::sleep(limit);
                stop.request_stop();
            })?;
        println!("Capturing for {:.1}s.\n", secs);
    } else {
        println!("Capture started. Press Ctrl+C to stop.\n");
    }

    let started = Instant::now();
    let mut last_report = Instant::now();
    let mut yielded = 0u64;
    let mut last_frame: Option<Frame> = None;

    while let Some(frame) = frames.next() {
        yielded += 1;
        if last_report.elapsed() >= Duration::from_secs(1) {
            let stats = frames.capture().stats();
            println!(
                "  {:>6.1}s  decoded {:>6}  errors {:>4}  {:>8.1} KiB/s",
                started.elapsed().as_secs_f64(),
                stats.frames_decoded,
                stats.decode_errors,
                stats.bytes_read as f64 / 1024.0 / started.elapsed().as_secs_f64()
            );
            last_report = Instant::now();
        }
        last_frame = Some(frame);
    }

    println!("\nStopping...");
    drop(frames);

    let elapsed = started.elapsed();
    let stats = capture.stats();
    println!("\nStatistics:");
    println!("  Duration: {:.2}s", elapsed.as_secs_f64());
    println!("  Bytes read: {}", stats.bytes_read);
    println!("  Access units: {}", stats.packets_parsed);
    println!("  Frames decoded: {}", stats.frames_decoded);
    println!("  Decode errors: {}", stats.decode_errors);
    println!("  Frames yielded: {}", yielded);
    if elapsed.as_secs_f64() > 0.0 {
        println!(
            "  Decode FPS: {:.1}",
            stats.frames_decoded as f64 / elapsed.as_secs_f64()
        );
    }

    if let Some(path) = snapshot {
        match last_frame {
            Some(frame) => {
                write_ppm(&path, &frame)?;
                println!("\nSnapshot written to {}", path.display());
            }
            None => eprintln!("\nNo frame was captured, snapshot not written"),
        }
    }

    Ok(())
}

fn cmd_script(config: CaptureConfig, decode: bool) -> anyhow::Result<()> {
    let script = recording_script(
        config.effective_time_limit(),
        config.resolution,
        &config.bitrate,
    );
    let command = encode_command(
        &script,
        &CommandOptions::default().with_busybox(config.use_busybox),
    );

    let serial = if config.device_serial.is_empty() {
        "<serial>"
    } else {
        config.device_serial.as_str()
    };
    println!(
        "{} -s {} shell '{}'",
        config.adb_path.display(),
        serial,
        command.trim_end()
    );

    if decode {
        let decoded = decode_payload(&command)?;
        println!("\n{}", decoded);
    }
    Ok(())
}

fn cmd_config() -> anyhow::Result<()> {
    print!("{}", CaptureConfig::default().to_toml_string()?);
    Ok(())
}

fn cmd_console_ctrl(pid: u32, event: u32) -> anyhow::Result<()> {
    let event = ConsoleEvent::from_code(event)
        .with_context(|| format!("Unknown console event {}", event))?;
    platform::raise_console_event(pid, event)?;
    Ok(())
}

/// Write `frame` as a binary PPM (P6) image
fn write_ppm(path: &Path, frame: &Frame) -> anyhow::Result<()> {
    let file = std::fs::File::create(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    let mut writer = std::io::BufWriter::new(file);
    write!(writer, "P6\n{} {}\n255\n", frame.width, frame.height)?;
    writer.write_all(&frame.to_rgb24())?;
    writer.flush()?;
    Ok(())
}
