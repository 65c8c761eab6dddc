use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info, Level};
use tracing_subscriber::fmt;

use protocol::EventRegistry;
use server::config::Args;
use server::integrations::init_main_backend;
use server::manager::LobbyManager;
use server::{api, codegen};

#[tokio::main]
async fn main() {
    fmt().compact().with_max_level(Level::INFO).init();

    // Building the event table validates every declaration; a bad spec must
    // stop the process before it accepts a single connection.
    let registry = EventRegistry::global();
    info!(events = registry.len(), "event table ready");

    let args = Args::parse();

    // tool mode: emit the client schema artifact and leave
    if let Some(path) = args.emit_event_specs.as_deref() {
        match codegen::write_event_specs(path) {
            Ok(()) => {
                info!(path = %path.display(), "event specs written");
                return;
            }
            Err(e) => {
                error!(error = %e, "failed to write event specs");
                std::process::exit(1);
            }
        }
    }

    init_main_backend(args.main_backend_url, args.main_backend_token);

    let manager = LobbyManager::new(args.message_encoding);
    let routes = api::routes(Arc::clone(&manager));

    let addr: SocketAddr = ([0, 0, 0, 0], args.service_port).into();
    let (bound, serving) =
        match warp::serve(routes).try_bind_with_graceful_shutdown(addr, shutdown_signal()) {
            Ok(pair) => pair,
            Err(e) => {
                error!(error = %e, "unable to bind the service port");
                std::process::exit(1);
            }
        };
    info!(addr = %bound, "server listening");

    serving.await;

    manager.shutdown().await;
    info!("all lobbies notified, shutting down");
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for the shutdown signal");
        return;
    }
    info!("received shutdown signal");
}
