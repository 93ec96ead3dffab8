use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "aquabeat", about = "Real-time audio feature extraction for visualizers")]
pub struct Cli {
    /// Input audio file (WAV, MP3, FLAC, OGG) to play and analyse
    pub input: Option<PathBuf>,

    /// Analyse a capture device instead of a file
    #[arg(long, conflicts_with = "input")]
    pub mic: bool,

    /// Capture device name (substring match); default input when omitted
    #[arg(long, requires = "mic")]
    pub device: Option<String>,

    /// List capture devices and exit
    #[arg(long)]
    pub list_devices: bool,

    /// Config file (defaults to aquabeat.toml or the user config dir)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Print one JSON object per frame to stdout
    #[arg(long)]
    pub json: bool,

    /// Include the raw frequency bins in JSON output
    #[arg(long, requires = "json")]
    pub raw: bool,

    /// Stop after this many seconds
    #[arg(short, long)]
    pub duration: Option<f32>,

    /// Analysis frames per second
    #[arg(long, default_value_t = 60)]
    pub fps: u32,

    /// FFT size (power of two)
    #[arg(long, default_value_t = 2048)]
    pub fft_size: usize,

    /// Spectrum time smoothing (0.0-1.0)
    #[arg(long, default_value_t = 0.75)]
    pub smoothing: f32,

    /// Minimum time between two beats, in milliseconds
    #[arg(long, default_value_t = 120)]
    pub refractory_ms: u64,
}
