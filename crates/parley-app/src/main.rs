//! Parley application binary - composition root.
//!
//! 1. Parse CLI args and load configuration from TOML
//! 2. Load or create the session identity
//! 3. Start the chat session manager over SockJS/STOMP
//! 4. Render feed, status and presence; read messages and commands from stdin
//! 5. Tear the session down on /quit, end of input, or Ctrl-C

mod cli;
mod console;

use std::sync::Arc;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;
use tokio_stream::StreamExt;

use parley_core::{IdentityStore, ParleyConfig};
use parley_session::{
    ChatSessionManager, EnvironmentSignal, HttpPresenceClient, SendOutcome, SessionSettings,
    SessionSnapshot, WeakSessionHandle,
};
use parley_stomp::SockJsConnector;

use cli::CliArgs;
use console::{ConsoleInput, Renderer, HELP};

/// Print every visible change until the session ends.
async fn render_loop(state: watch::Receiver<SessionSnapshot>) {
    let mut renderer = Renderer::new();
    let mut updates = WatchStream::new(state);
    while let Some(snapshot) = updates.next().await {
        for line in renderer.render(&snapshot) {
            println!("{line}");
        }
    }
}

/// Map SIGUSR1 to a network-online signal until the session is gone.
#[cfg(unix)]
fn forward_online_signal(session: WeakSessionHandle) {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::user_defined1()) {
        Ok(mut usr1) => {
            tokio::spawn(async move {
                while usr1.recv().await.is_some() {
                    tracing::info!("SIGUSR1: network online");
                    if !session.signal(EnvironmentSignal::NetworkOnline) {
                        break;
                    }
                }
            });
        }
        Err(e) => tracing::warn!(error = %e, "SIGUSR1 handler unavailable"),
    }
}

#[cfg(not(unix))]
fn forward_online_signal(_session: WeakSessionHandle) {}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = CliArgs::parse();

    // Config.
    let config_file = args.resolve_config_path();
    let mut config = ParleyConfig::load_or_default(&config_file);
    args.apply(&mut config);

    // Tracing. RUST_LOG wins over the configured level.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.general.log_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    tracing::info!("Starting Parley v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!(path = %config_file.display(), server = %config.broker.base_url, "Configuration resolved");

    // Identity.
    let data_dir = config.general.resolved_data_dir();
    if let Err(e) = std::fs::create_dir_all(&data_dir) {
        tracing::error!(path = %data_dir.display(), error = %e, "Failed to create data directory");
        return Err(e.into());
    }
    let mut identity = IdentityStore::new(&data_dir, config.identity.scope).load_or_create()?;
    if let Some(nickname) = args.resolve_nickname() {
        identity = identity.with_nickname(nickname);
    }
    tracing::info!(user_id = %identity.id, nickname = %identity.nickname, "Session identity ready");

    // Session.
    let http = reqwest::Client::new();
    let connector = Arc::new(SockJsConnector::new(&config.broker, http.clone()));
    let presence = Arc::new(HttpPresenceClient::from_config(&config, http));
    let session = ChatSessionManager::start(
        SessionSettings::from_config(&config),
        identity.clone(),
        connector,
        presence,
    );

    println!("Joined as {}. Type /help for commands.", identity.nickname);
    let renderer = tokio::spawn(render_loop(session.state()));
    forward_online_signal(session.downgrade());

    // Input.
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let line = match line {
                    Ok(Some(line)) => line,
                    Ok(None) => break,
                    Err(e) => {
                        tracing::warn!(error = %e, "Failed to read stdin");
                        break;
                    }
                };
                match ConsoleInput::parse(&line) {
                    ConsoleInput::Message(text) => match session.send(text).await {
                        Ok(SendOutcome::Published) => {}
                        Ok(SendOutcome::NotConnected) => {
                            tracing::debug!("Message dropped while disconnected");
                        }
                        Err(e) => eprintln!("! {e}"),
                    },
                    ConsoleInput::Signal(signal) => session.signal(signal),
                    ConsoleInput::Help => println!("{HELP}"),
                    ConsoleInput::Quit => break,
                    ConsoleInput::Unknown(command) => {
                        eprintln!("! unknown command {command}, try /help");
                    }
                    ConsoleInput::Empty => {}
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted");
                break;
            }
        }
    }

    // Teardown.
    session.shutdown().await;
    let final_state = session.snapshot();
    tracing::info!(status = %final_state.status, "Chat session closed");
    drop(session);
    renderer.abort();

    Ok(())
}
