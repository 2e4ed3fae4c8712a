// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use clap::Parser;
use pantry_session::SessionConfig;

use crate::command::Command;

/// Pantry session client.
#[derive(Debug, Parser)]
#[command(name = "pantry", version, about)]
pub struct Cli {
    #[command(flatten)]
    pub session: SessionConfig,

    /// Log format (json or text).
    #[arg(long, env = "PANTRY_LOG_FORMAT", default_value = "text", global = true)]
    pub log_format: String,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, env = "PANTRY_LOG_LEVEL", default_value = "warn", global = true)]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Command,
}

/// Initialize tracing on stderr so command output stays clean on stdout.
pub fn init_tracing(cli: &Cli) {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_new(&cli.log_level).unwrap_or_else(|_| EnvFilter::new("warn"));

    let result = match cli.log_format.as_str() {
        "json" => fmt::fmt().with_env_filter(filter).with_writer(std::io::stderr).json().try_init(),
        _ => fmt::fmt().with_env_filter(filter).with_writer(std::io::stderr).try_init(),
    };
    drop(result);
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
