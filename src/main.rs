mod cli;

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use std::io::Write;
use std::ops::ControlFlow;
use std::path::PathBuf;
use std::rc::Rc;
use std::time::{Duration, Instant};

use aquabeat::audio::context::AudioContext;
use aquabeat::audio::device::CpalDevice;
use aquabeat::config::{self, Config};
use aquabeat::pump::FramePump;
use aquabeat::{
    AnalysisSession, AudioAnalysis, AudioSource, LiveCapture, PlayableMedia, SessionConfig,
    SessionHandle,
};
use cli::Cli;

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let cli = Cli::parse();

    if cli.list_devices {
        let devices = CpalDevice::new().list_input_devices()?;
        println!("Capture devices:");
        for device in &devices {
            let marker = if device.is_default { "*" } else { " " };
            println!(
                "  {} {:<40} {} ch @ {} Hz",
                marker, device.name, device.channels, device.sample_rate
            );
        }
        return Ok(());
    }

    let config = resolve_config(&cli);

    let limit = cli
        .duration
        .map(Duration::try_from_secs_f32)
        .transpose()
        .context("--duration must be a positive number of seconds")?;

    let source = if cli.mic {
        let capture = match cli.device.clone() {
            Some(name) => LiveCapture::named(name),
            None => LiveCapture::default_input(),
        };
        AudioSource::Live(capture)
    } else {
        let input = cli
            .input
            .as_ref()
            .context("Input audio file is required (or pass --mic)")?;
        if !input.exists() {
            anyhow::bail!("Input file not found: {}", input.display());
        }
        log::info!("Decoding audio...");
        AudioSource::Playable(PlayableMedia::open(input)?)
    };

    let track_secs = match &source {
        AudioSource::Playable(media) => Some(media.track().duration_secs()),
        AudioSource::Live(_) => None,
    };

    log::info!("aquabeat - real-time audio features");
    log::info!("Source: {}", source.label());
    log::info!("Frame rate: {} fps", config.pump.fps);

    let context = Rc::new(AudioContext::system());
    let mut session = AnalysisSession::new(Rc::clone(&context), SessionConfig::from(&config));
    session
        .init(source)
        .context("Failed to start analysis session")?;
    let handle = SessionHandle::new(session);

    let pb = progress_bar(cli.json, track_secs)?;
    let pump = FramePump::from_config(&config.pump).with_limit(limit);
    let started = Instant::now();
    let mut stdout = std::io::stdout().lock();

    let stats = pump.run(&handle, |frame| {
        if cli.json {
            if let Err(e) = write_json(&mut stdout, frame, cli.raw) {
                log::warn!("Stopping: failed to write output: {}", e);
                return ControlFlow::Break(());
            }
        } else {
            pb.set_message(meter(frame));
            pb.set_position(started.elapsed().as_millis() as u64);
        }
        ControlFlow::Continue(())
    });

    handle.dispose();
    pb.finish_and_clear();

    log::info!(
        "Done: {} frames, {} beats in {:.1}s",
        stats.frames,
        stats.beats,
        started.elapsed().as_secs_f32()
    );
    Ok(())
}

/// File config first, then any CLI flag moved off its default.
fn resolve_config(cli: &Cli) -> Config {
    let config_path = cli.config.clone().or_else(|| {
        let local = PathBuf::from("aquabeat.toml");
        if local.exists() {
            return Some(local);
        }
        if let Some(home) = dirs::home_dir() {
            let xdg = home.join(".config").join("aquabeat").join("config.toml");
            if xdg.exists() {
                return Some(xdg);
            }
        }
        if let Some(config_dir) = dirs::config_dir() {
            let platform = config_dir.join("aquabeat").join("config.toml");
            if platform.exists() {
                return Some(platform);
            }
        }
        None
    });

    let mut config = Config::default();
    if let Some(ref path) = config_path {
        match config::load_config(path) {
            Ok(loaded) => {
                log::info!("Loaded config from {}", path.display());
                config = loaded;
            }
            Err(e) => log::warn!("Ignoring config: {:#}", e),
        }
    }

    if cli.fps != 60 { config.pump.fps = cli.fps; }
    if cli.fft_size != 2048 { config.analyzer.fft_size = cli.fft_size; }
    if cli.smoothing != 0.75 { config.analyzer.smoothing = cli.smoothing; }
    if cli.refractory_ms != 120 { config.features.refractory_ms = cli.refractory_ms; }

    config
}

fn progress_bar(hidden: bool, track_secs: Option<f32>) -> Result<ProgressBar> {
    if hidden {
        return Ok(ProgressBar::hidden());
    }
    let pb = match track_secs {
        Some(secs) => {
            let pb = ProgressBar::new((secs * 1000.0) as u64);
            pb.set_style(
                ProgressStyle::default_bar()
                    .template("[{elapsed_precise}] {bar:30.cyan/blue} {msg}")?
                    .progress_chars("=>-"),
            );
            pb
        }
        None => {
            let pb = ProgressBar::new_spinner();
            pb.set_style(ProgressStyle::default_spinner().template("{spinner} [{elapsed_precise}] {msg}")?);
            pb
        }
    };
    Ok(pb)
}

fn meter(frame: &AudioAnalysis) -> String {
    let filled = (frame.volume * 20.0).round() as usize;
    format!(
        "vol {}{} pitch {:.2} timbre {:.2} {}",
        "#".repeat(filled),
        "-".repeat(20 - filled),
        frame.pitch,
        frame.timbre,
        if frame.beat { "BEAT" } else { "" }
    )
}

fn write_json(out: &mut impl Write, frame: &AudioAnalysis, raw: bool) -> Result<()> {
    if raw {
        serde_json::to_writer(&mut *out, frame)?;
    } else {
        let trimmed = AudioAnalysis {
            raw_fft: Vec::new(),
            ..frame.clone()
        };
        serde_json::to_writer(&mut *out, &trimmed)?;
    }
    writeln!(out)?;
    Ok(())
}
