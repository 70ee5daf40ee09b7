use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(
    name = "wspr-ingest",
    version,
    about = "Record WSPR cycles from remote SDR receivers, decode them and publish the spots",
    long_about = None
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Make a single recording and exit
    Record(RecordArgs),

    /// Run the multi-band decoder service
    Decode(DecodeArgs),
}

#[derive(Debug, Args)]
pub struct RecordArgs {
    /// Receiver host
    #[arg(long)]
    pub host: String,

    #[arg(long, default_value_t = 8073)]
    pub port: u16,

    /// Dial frequency in kHz
    #[arg(short, long)]
    pub frequency: f64,

    /// Demodulation mode
    #[arg(short, long, default_value = "usb")]
    pub mode: String,

    /// Recording length in seconds
    #[arg(short, long, default_value_t = 115)]
    pub duration: u64,

    /// Passband low edge in Hz
    #[arg(long, default_value_t = 300, allow_negative_numbers = true)]
    pub low_cut: i32,

    /// Passband high edge in Hz
    #[arg(long, default_value_t = 2700, allow_negative_numbers = true)]
    pub high_cut: i32,

    #[arg(short, long, default_value = ".")]
    pub output_dir: PathBuf,

    /// Ask the receiver for uncompressed audio
    #[arg(long)]
    pub no_compression: bool,

    /// Log to file only
    #[arg(short, long)]
    pub quiet: bool,

    /// Recorder executable
    #[arg(long, default_value = "kiwirecorder.py")]
    pub recorder: PathBuf,
}

#[derive(Debug, Args)]
pub struct DecodeArgs {
    /// Fleet configuration file
    #[arg(short, long, default_value = "wspr.yaml")]
    pub config: PathBuf,

    /// Status surface port
    #[arg(short, long, default_value_t = 8080)]
    pub port: u16,

    /// Serve status and receiver health without running any band
    #[arg(long)]
    pub status_only: bool,

    /// Decode one cycle on every band, then exit
    #[arg(long, conflicts_with = "status_only")]
    pub one_shot: bool,
}
