use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::Config;

/// The command line interface for the LocoNet monitor.
#[derive(Parser)]
#[command(author, version, about)]
pub struct Cli {
    /// Path to a configuration file
    pub config: Option<PathBuf>,

    /// Path to the serial port
    #[arg(short, long)]
    pub port: Option<String>,

    /// Baud rate of the serial port
    #[arg(short, long)]
    pub baud: Option<u32>,

    /// Seconds between scrollkeeper reports
    #[arg(short = 'i', long)]
    pub report_interval: Option<u64>,

    /// Capture all traffic to the capture file
    #[arg(short, long)]
    pub capture: bool,

    /// Precede captured frames with timestamp frames
    #[arg(short, long)]
    pub timestamp: bool,

    /// Log received messages to stderr
    #[arg(short, long)]
    pub log: bool,

    /// Replay traffic from the capture file instead of opening a port
    #[arg(short, long)]
    pub replay: bool,

    /// Replay as fast as possible, ignoring recorded timing
    #[arg(long)]
    pub fast_replay: bool,

    /// Use an in-memory port instead of real hardware
    #[arg(short, long)]
    pub dummy: bool,

    /// Name of the capture file
    #[arg(short = 'f', long)]
    pub capture_file: Option<PathBuf>,

    /// Print a scrollkeeper report after every slot update
    #[arg(short, long)]
    pub slot_trace: bool,

    /// Serve layout snapshots to browsers on this port
    #[arg(short, long)]
    pub web_port: Option<u16>,

    /// More verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Subcommands
    #[command(subcommand)]
    pub command: Option<Commands>,
}

impl Cli {
    /// Overlay the flags onto a configuration; flags win.
    pub fn apply(&self, config: &mut Config) {
        if let Some(port) = &self.port {
            config.port = port.clone();
        }
        if let Some(baud) = self.baud {
            config.baud = baud;
        }
        if let Some(interval) = self.report_interval {
            config.report_interval = interval;
        }
        if let Some(capture_file) = &self.capture_file {
            config.capture_file = capture_file.clone();
        }
        if let Some(web_port) = self.web_port {
            config.web_port = Some(web_port);
        }
        config.capture |= self.capture;
        config.timestamp |= self.timestamp;
        config.log |= self.log;
        config.replay |= self.replay;
        config.fast_replay |= self.fast_replay;
        config.dummy |= self.dummy;
        config.slot_trace |= self.slot_trace;
    }
}

/// Commands available in the command line interface.
#[derive(Subcommand, Clone)]
pub enum Commands {
    /// Examples for user convenience.
    #[clap(subcommand)]
    Examples(Examples),
}

/// Helpful examples for users.
#[derive(Subcommand, Clone)]
pub enum Examples {
    /// Show an example of a configuration file's contents.
    Config,
}

/// Print the requested example and return.
pub fn handle_command(command: Commands) {
    match command {
        Commands::Examples(Examples::Config) => {
            println!("{}", Config::example().serialize_pretty());
        }
    }
}
