// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `pantry` subcommands.

use std::sync::Arc;

use serde_json::Value;
use tokio_util::sync::CancellationToken;

use pantry_session::api::{Credentials, Registration, User};
use pantry_session::{spawn_session_monitor, ApiClient, AuthError, AuthEvent, AuthSession};

use crate::config::Cli;

#[derive(Debug, clap::Subcommand)]
pub enum Command {
    /// Sign in and store the issued tokens.
    Login {
        #[arg(long)]
        email: String,
        #[arg(long, env = "PANTRY_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Create an account and sign in.
    Register {
        #[arg(long)]
        email: String,
        #[arg(long, env = "PANTRY_PASSWORD", hide_env_values = true)]
        password: String,
        /// Display name.
        #[arg(long)]
        name: Option<String>,
    },
    /// Sign out and clear stored credentials.
    Logout,
    /// Verify the stored session with the server.
    Status,
    /// GET an API path through the authenticated pipeline.
    Get { path: String },
    /// POST a JSON body to an API path through the authenticated pipeline.
    Post { path: String, body: String },
    /// PUT a JSON body to an API path through the authenticated pipeline.
    Put { path: String, body: String },
    /// DELETE an API path through the authenticated pipeline.
    Delete { path: String },
    /// Keep the session fresh in the background and print auth events.
    Watch,
}

/// Run a subcommand. Returns a process exit code.
pub async fn run(cli: Cli) -> i32 {
    let session = AuthSession::from_config(cli.session);
    let result = match cli.command {
        Command::Login { email, password } => {
            login(&session, Credentials { email, password }).await
        }
        Command::Register { email, password, name } => {
            register(&session, Registration { email, password, name }).await
        }
        Command::Logout => {
            session.logout();
            println!("Signed out.");
            Ok(0)
        }
        Command::Status => status(&session).await,
        Command::Get { path } => {
            let client = ApiClient::new(session);
            print_response(client.get_json::<Value>(&path).await)
        }
        Command::Post { path, body } => match parse_body(&body) {
            Ok(body) => {
                let client = ApiClient::new(session);
                print_response(client.post_json(&path, body).await)
            }
            Err(e) => Err(e),
        },
        Command::Put { path, body } => match parse_body(&body) {
            Ok(body) => {
                let client = ApiClient::new(session);
                print_response(client.put_json(&path, body).await)
            }
            Err(e) => Err(e),
        },
        Command::Delete { path } => {
            let client = ApiClient::new(session);
            print_response(client.delete(&path).await)
        }
        Command::Watch => watch(session).await,
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e:#}");
            1
        }
    }
}

async fn login(session: &AuthSession, credentials: Credentials) -> anyhow::Result<i32> {
    let user = session.login(&credentials).await?;
    println!("Signed in as {}.", display_name(user.as_ref(), &credentials.email));
    Ok(0)
}

async fn register(session: &AuthSession, registration: Registration) -> anyhow::Result<i32> {
    let user = session.register(&registration).await?;
    println!("Account created for {}.", display_name(user.as_ref(), &registration.email));
    Ok(0)
}

async fn status(session: &AuthSession) -> anyhow::Result<i32> {
    if !session.check_auth().await {
        println!("Not signed in.");
        return Ok(1);
    }
    let who = session.current_user();
    println!("Signed in as {}.", display_name(who.as_ref(), "unknown user"));
    if let Some(secs) = session.oracle().seconds_until_expiry() {
        println!("Access token expires in {}.", format_remaining(secs));
    }
    Ok(0)
}

fn parse_body(body: &str) -> anyhow::Result<Value> {
    serde_json::from_str(body).map_err(|e| anyhow::anyhow!("invalid JSON body: {e}"))
}

fn print_response(result: Result<Value, AuthError>) -> anyhow::Result<i32> {
    let value = result?;
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(0)
}

async fn watch(session: Arc<AuthSession>) -> anyhow::Result<i32> {
    if !session.check_auth().await {
        println!("Not signed in.");
        return Ok(1);
    }

    let shutdown = CancellationToken::new();
    let mut events = session.subscribe();
    let monitor = spawn_session_monitor(Arc::clone(&session), shutdown.clone());
    tracing::info!("watching session");

    let code = loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break 0,
            event = events.recv() => match event {
                Ok(event) => {
                    println!("{}", serde_json::to_string(&event)?);
                    if let Some(notice) = event.notice() {
                        eprintln!("{notice}");
                    }
                    if ends_watch(&event) {
                        break 1;
                    }
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(skipped = n, "event stream lagged");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break 1,
            },
        }
    };

    shutdown.cancel();
    monitor.stop().await;
    Ok(code)
}

/// Events after which there is no session left to watch.
fn ends_watch(event: &AuthEvent) -> bool {
    matches!(
        event,
        AuthEvent::LoggedOut | AuthEvent::TokenExpired { .. } | AuthEvent::SessionExpired
    )
}

fn display_name(user: Option<&User>, fallback: &str) -> String {
    let Some(user) = user else {
        return fallback.to_owned();
    };
    match (&user.name, &user.email) {
        (Some(name), Some(email)) => format!("{name} <{email}>"),
        (Some(name), None) => name.clone(),
        (None, Some(email)) => email.clone(),
        (None, None) => fallback.to_owned(),
    }
}

fn format_remaining(secs: i64) -> String {
    if secs <= 0 {
        return "0s (expired)".to_owned();
    }
    let (h, m, s) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    match (h, m) {
        (0, 0) => format!("{s}s"),
        (0, _) => format!("{m}m {s:02}s"),
        _ => format!("{h}h {m:02}m"),
    }
}

#[cfg(test)]
#[path = "command_tests.rs"]
mod tests;
