//! Command-line argument parsing for `zonewardctl`.

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "zonewardctl", about = "Command-line client for zonewardd", version)]
pub struct Cli {
    /// Base URL of the daemon's HTTP surface, e.g. `http://127.0.0.1:8080`.
    #[arg(long, default_value = "http://127.0.0.1:8080")]
    pub base_url: url::Url,

    /// Identity forwarded via the `x-zoneward-kid` header. A real deployment
    /// has a reverse proxy set this after verifying a signed request; for
    /// direct use it is taken from the command line instead.
    #[arg(long, default_value = "zonewardctl")]
    pub kid: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Dispatch a command to one or more zones and print the classification.
    Dispatch {
        /// Command name, e.g. `sign_start`, `goto_signed`, `drop_dead`.
        command: String,

        /// One or more zone names.
        #[arg(required = true)]
        zones: Vec<String>,
    },

    /// Fetch the daemon's Prometheus metrics page.
    Metrics,
}
