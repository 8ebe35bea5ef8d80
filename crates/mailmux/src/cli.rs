//! Command-line interface.

use std::path::PathBuf;

use clap::Parser;
use mailmux_core::Config;

/// Local sidecar that multiplexes IMAP and SMTP sessions over a Unix socket
#[derive(Debug, Parser)]
#[command(name = "mailmux", version)]
#[command(about = "Serve IMAP/SMTP sessions to a local controller over newline-delimited JSON")]
pub struct Cli {
    /// Unix socket to listen on
    #[arg(long, env = "NATIVE_SOCKET_PATH")]
    pub socket: Option<PathBuf>,

    /// JSON config file (default: <config dir>/mailmux/config.json)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Per-action deadline in seconds (0 disables)
    #[arg(long, value_name = "SECS")]
    pub command_timeout: Option<u64>,

    /// Log filter used when RUST_LOG is unset
    #[arg(long, default_value = "mailmux=info,mailmux_core=info")]
    pub log_filter: String,
}

impl Cli {
    /// Applies command-line overrides on top of file settings.
    pub fn apply(&self, config: &mut Config) {
        if let Some(socket) = &self.socket {
            config.socket_path.clone_from(socket);
        }
        if let Some(secs) = self.command_timeout {
            config.command_timeout = Some(secs);
        }
    }
}
