//! Command-line arguments.
//!
//! Every flag overrides the matching key of the settings file for this run
//! only; `setSettings` persists.

use std::path::PathBuf;

use ambicast_core::Settings;
use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "ambicast")]
#[command(version, about = "Capture UI + video, blend, and stream RGB frames to an ambient-light sink", long_about = None)]
pub struct Args {
    /// Settings file (JSON)
    #[arg(short, long, env = "AMBICAST_CONFIG", default_value = "/var/lib/ambicast/config.json")]
    pub config: PathBuf,

    /// Sink address
    #[arg(short, long, env = "AMBICAST_ADDRESS")]
    pub address: Option<String>,

    /// Sink port
    #[arg(short, long, env = "AMBICAST_PORT")]
    pub port: Option<u16>,

    /// Priority channel registered with the sink
    #[arg(long)]
    pub priority: Option<i32>,

    /// Capture frame rate (0 = 60)
    #[arg(short, long)]
    pub fps: Option<u32>,

    /// Output width
    #[arg(long)]
    pub width: Option<u32>,

    /// Output height
    #[arg(long)]
    pub height: Option<u32>,

    /// UI backend name, or "auto"
    #[arg(long)]
    pub ui_backend: Option<String>,

    /// Video backend name, or "auto"
    #[arg(long)]
    pub video_backend: Option<String>,

    /// Disable UI capture
    #[arg(long)]
    pub no_gui: bool,

    /// Disable video capture
    #[arg(long)]
    pub no_video: bool,

    /// Start streaming immediately, regardless of `autostart`
    #[arg(short, long)]
    pub start: bool,

    /// Verbose logging (can be specified multiple times)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

impl Args {
    /// Apply the flags given on the command line on top of `settings`.
    pub fn apply(&self, settings: &mut Settings) {
        if let Some(address) = &self.address {
            settings.address = address.clone();
        }
        if let Some(port) = self.port {
            settings.port = port;
        }
        if let Some(priority) = self.priority {
            settings.priority = priority;
        }
        if let Some(fps) = self.fps {
            settings.fps = fps;
        }
        if let Some(width) = self.width {
            settings.width = width;
        }
        if let Some(height) = self.height {
            settings.height = height;
        }
        if let Some(ui) = &self.ui_backend {
            settings.ui_backend = ui.clone();
        }
        if let Some(video) = &self.video_backend {
            settings.video_backend = video.clone();
        }
        settings.no_gui |= self.no_gui;
        settings.no_video |= self.no_video;
    }

    pub fn log_level(&self) -> &'static str {
        match self.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    }
}
