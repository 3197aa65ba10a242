// ABOUTME: Command-line interface definition using clap derive macros.
// ABOUTME: Defines all subcommands and their arguments.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "fleetsh")]
#[command(about = "Run commands over SSH on configured hosts")]
#[command(version)]
pub struct Cli {
    /// Path to the configuration file (default: ./fleetsh.yml)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Log debug output, including every command sent
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List configured targets
    Hosts,

    /// Run a command and print its output once it exits
    Exec {
        host: String,
        user: String,

        /// Include stderr, interleaved with stdout
        #[arg(long)]
        combined: bool,

        #[arg(last = true, required = true)]
        command: Vec<String>,
    },

    /// Run a command and print its output line by line as it arrives
    Stream {
        host: String,
        user: String,

        /// Give up after this many seconds
        #[arg(short, long, default_value_t = 60)]
        timeout: u64,

        #[arg(last = true, required = true)]
        command: Vec<String>,
    },

    /// Stream a command on every configured target at once
    Fleet {
        /// Give up on a target after this many seconds
        #[arg(short, long, default_value_t = 60)]
        timeout: u64,

        #[arg(last = true, required = true)]
        command: Vec<String>,
    },
}
