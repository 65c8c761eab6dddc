use std::path::PathBuf;

use clap::Parser;

use protocol::MessageEncoding;

/// Runtime configuration, read from flags with environment fallbacks.
#[derive(Parser, Debug)]
#[command(author, version, about = "Multiplayer lobby backend")]
pub struct Args {
    /// TCP port the HTTP/WebSocket surface listens on
    #[arg(long, env = "SERVICE_PORT")]
    pub service_port: u16,

    /// Broadcast encoding for lobbies that do not request one
    #[arg(long, env = "MESSAGE_ENCODING", default_value = "binary", value_parser = parse_encoding)]
    pub message_encoding: MessageEncoding,

    /// Base URL of the main game backend
    #[arg(long, env = "MAIN_BACKEND_URL")]
    pub main_backend_url: Option<String>,

    /// Bearer token presented to the main game backend
    #[arg(long, env = "MAIN_BACKEND_TOKEN")]
    pub main_backend_token: Option<String>,

    /// Write the generated client event-spec file (.ts or .json) and exit
    #[arg(long, value_name = "PATH")]
    pub emit_event_specs: Option<PathBuf>,
}

fn parse_encoding(raw: &str) -> Result<MessageEncoding, String> {
    MessageEncoding::from_name(raw)
        .ok_or_else(|| format!("unknown encoding {raw:?}, expected binary, base16 or base64"))
}
