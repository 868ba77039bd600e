//! socket-echo: an echo service over stream and datagram sockets
//!
//! Transports:
//! - TCP (`IP:port`)
//! - Unix-domain stream sockets (filesystem path)
//! - UDP (`IP:port`)
//!
//! Features:
//! - Sequential (one session at a time) or concurrent (task per connection)
//!   session scheduling for stream transports
//! - Interactive line clients for every transport
//! - Socket file cleanup on shutdown
//! - Configuration via CLI arguments or TOML file

mod client;
mod config;
mod datagram;
mod error;
mod peer;
mod server;
mod session;
mod shutdown;

use std::io::IsTerminal;

use client::ClientOptions;
use config::{Config, Role, Transport};
use server::SessionSettings;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let mut builder = tokio::runtime::Builder::new_multi_thread();
    if let Some(workers) = config.workers {
        builder.worker_threads(workers);
    }
    let runtime = builder.enable_all().build()?;

    runtime.block_on(async {
        match config.role {
            Role::Server => run_server(config).await,
            Role::Client => run_client(config).await,
        }
    })
}

async fn run_server(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    info!(
        transport = ?config.transport,
        mode = ?config.mode,
        address = %config.address,
        socket_path = %config.socket_path.display(),
        max_message_size = config.max_message_size,
        backlog = config.backlog,
        "Starting socket-echo server"
    );

    let settings = SessionSettings {
        max_message_size: config.max_message_size,
        max_connections: config.max_connections,
    };

    // Bind failures are fatal and surface through `?`.
    match config.transport {
        Transport::Tcp => {
            let listener = server::bind_tcp(config.socket_addr()?, config.backlog)?;
            server::log_listening(&listener);
            tokio::select! {
                _ = server::serve(listener, config.mode, settings) => {}
                _ = shutdown::shutdown_signal() => {}
            }
        }
        Transport::Unix => {
            let endpoint = server::bind_unix(&config.socket_path, config.backlog)?;
            info!(path = %endpoint.path().display(), "Server listening");
            tokio::select! {
                _ = server::serve(endpoint, config.mode, settings) => {}
                _ = shutdown::shutdown_signal() => {}
            }
        }
        Transport::Udp => {
            let socket = datagram::bind_udp(config.socket_addr()?)?;
            info!(address = %socket.local_addr()?, "Server listening");
            tokio::select! {
                _ = datagram::serve_datagrams(socket, config.max_message_size) => {}
                _ = shutdown::shutdown_signal() => {}
            }
        }
    }

    info!("Server stopped");
    Ok(())
}

async fn run_client(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let options = ClientOptions {
        max_message_size: config.max_message_size,
        interactive: std::io::stdin().is_terminal(),
    };
    let input = tokio::io::BufReader::new(tokio::io::stdin());
    let output = tokio::io::stdout();

    let stats = match config.transport {
        Transport::Tcp => {
            let stream = client::connect_tcp(config.socket_addr()?).await?;
            client::run_stream_client(stream, input, output, options).await?
        }
        Transport::Unix => {
            let stream = client::connect_unix(&config.socket_path).await?;
            client::run_stream_client(stream, input, output, options).await?
        }
        Transport::Udp => {
            let socket = client::connect_udp(config.socket_addr()?).await?;
            client::run_datagram_client(&socket, input, output, options).await?
        }
    };

    info!(
        messages = stats.messages,
        skipped = stats.skipped,
        "Client finished"
    );
    Ok(())
}
