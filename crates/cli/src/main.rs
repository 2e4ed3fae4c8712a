// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

mod command;
mod config;

use clap::Parser;

use crate::config::{init_tracing, Cli};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(&cli);
    pantry_session::api::ensure_crypto_provider();

    let code = command::run(cli).await;
    std::process::exit(code);
}
