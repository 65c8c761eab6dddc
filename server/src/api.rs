// The public HTTP surface: lobby creation, the WebSocket upgrade, and the
// two read-only state queries. Every error reply carries a human-readable
// explanation in the Default-Debug-Header so browser consoles show more
// than a bare status code.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tracing::{error, info, warn};
use warp::http::header::HeaderValue;
use warp::http::StatusCode;
use warp::ws::WebSocket;
use warp::{Filter, Rejection, Reply};

use protocol::{
    event_id, prepare_server_message, ClientId, EventRegistry, LobbyId, MessageEncoding,
    SERVER_ID,
};

use crate::activity::LobbyPhase;
use crate::lobby::JoinErrorKind;
use crate::manager::LobbyManager;
use crate::transport::{Transport, WsTransport};

pub const DEBUG_HEADER: &str = "Default-Debug-Header";

#[derive(Serialize)]
struct CreateLobbyResponse {
    id: LobbyId,
}

#[derive(Serialize)]
struct HealthResponse {
    status: bool,
    #[serde(rename = "lobbyCount")]
    lobby_count: u32,
}

#[derive(Serialize)]
struct ClientStateResponse {
    #[serde(rename = "lastKnownPosition")]
    last_known_position: u32,
    #[serde(rename = "msOfLastMessage")]
    ms_of_last_message: u64,
}

#[derive(Serialize)]
struct ClientResponse {
    id: ClientId,
    ign: String,
    #[serde(rename = "type")]
    origin: &'static str,
    state: ClientStateResponse,
}

#[derive(Serialize)]
struct LobbyStateResponse {
    #[serde(rename = "colonyID")]
    colony_id: u32,
    closing: bool,
    phase: LobbyPhase,
    encoding: &'static str,
    clients: Vec<ClientResponse>,
}

/// All public routes against one shared manager.
pub fn routes(
    manager: Arc<LobbyManager>,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    let with_manager = {
        let manager = Arc::clone(&manager);
        warp::any().map(move || Arc::clone(&manager))
    };

    let create_lobby = warp::path("create-lobby")
        .and(warp::path::end())
        .and(warp::post())
        .and(warp::query::<HashMap<String, String>>())
        .and(with_manager.clone())
        .map(create_lobby_handler);

    let connect = warp::path("connect")
        .and(warp::path::end())
        .and(warp::get())
        .and(warp::query::<HashMap<String, String>>())
        .and(warp::ws())
        .and(with_manager.clone())
        .map(connect_handler);

    let health = warp::path("health")
        .and(warp::path::end())
        .and(warp::get())
        .and(with_manager.clone())
        .map(health_handler);

    let lobby_state = warp::path!("lobby" / String)
        .and(warp::get())
        .and(with_manager)
        .map(lobby_state_handler);

    create_lobby.or(connect).or(health).or(lobby_state)
}

fn create_lobby_handler(
    params: HashMap<String, String>,
    manager: Arc<LobbyManager>,
) -> warp::reply::Response {
    let owner_id = match get_u32(&params, "ownerID") {
        Ok(value) => value,
        Err(detail) => return error_reply(StatusCode::BAD_REQUEST, "Error in ownerID", detail),
    };
    let colony_id = match get_u32(&params, "colonyID") {
        Ok(value) => value,
        Err(detail) => return error_reply(StatusCode::BAD_REQUEST, "Error in colonyID", detail),
    };
    if owner_id == SERVER_ID {
        return error_reply(
            StatusCode::BAD_REQUEST,
            "Error in ownerID",
            format!("ownerID {owner_id} is reserved"),
        );
    }

    // unknown or absent encodings mean "no preference"
    let encoding = params
        .get("encoding")
        .and_then(|name| MessageEncoding::from_name(name))
        .unwrap_or(MessageEncoding::Binary);

    match manager.create_lobby(owner_id, colony_id, encoding) {
        Ok(lobby) => warp::reply::json(&CreateLobbyResponse { id: lobby.id }).into_response(),
        Err(e) => error_reply(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Error creating lobby",
            format!("Error creating lobby: {e}"),
        ),
    }
}

fn connect_handler(
    params: HashMap<String, String>,
    ws: warp::ws::Ws,
    manager: Arc<LobbyManager>,
) -> warp::reply::Response {
    let ign = match params.get("IGN") {
        Some(value) if !value.is_empty() => value.clone(),
        _ => {
            return error_reply(
                StatusCode::BAD_REQUEST,
                "IGN not provided",
                "IGN query param missing".to_owned(),
            )
        }
    };

    let mut parsed = [0u32; 4];
    for (slot, key) in parsed.iter_mut().zip(["lobbyID", "clientID", "colonyID", "ownerID"]) {
        match get_u32(&params, key) {
            Ok(value) => *slot = value,
            Err(detail) => {
                return error_reply(StatusCode::BAD_REQUEST, &format!("Error in {key}"), detail)
            }
        }
    }
    let [lobby_id, client_id, colony_id, owner_id] = parsed;

    if client_id == SERVER_ID {
        return error_reply(
            StatusCode::BAD_REQUEST,
            "Error in clientID",
            format!("clientID {client_id} is reserved"),
        );
    }

    if let Err(join_err) = manager.is_join_possible(lobby_id, client_id, colony_id, owner_id) {
        let (status, public) = match join_err.kind {
            JoinErrorKind::NotFound => (StatusCode::NOT_FOUND, "Lobby not found"),
            JoinErrorKind::AlreadyInLobby => (StatusCode::CONFLICT, "User already in lobby"),
            JoinErrorKind::Closing => (StatusCode::GONE, "Lobby is closing"),
            JoinErrorKind::SerializationFailure => {
                (StatusCode::INTERNAL_SERVER_ERROR, "Failed to join lobby")
            }
        };
        return error_reply(status, public, join_err.to_string());
    }

    ws.on_upgrade(move |socket| finish_join(manager, lobby_id, client_id, ign, socket))
        .into_response()
}

/// Runs after the protocol upgrade. A join that fails here can only be
/// reported over the socket itself.
async fn finish_join(
    manager: Arc<LobbyManager>,
    lobby_id: LobbyId,
    client_id: ClientId,
    ign: String,
    socket: WebSocket,
) {
    let transport: Arc<dyn Transport> = Arc::new(WsTransport::new(socket));

    if let Err(join_err) = manager
        .join_lobby(lobby_id, client_id, ign, Arc::clone(&transport))
        .await
    {
        error!(client = client_id, lobby = lobby_id, error = %join_err, "join failed after upgrade");

        let spec = EventRegistry::global().expect(event_id::DEBUG);
        let mut msg = prepare_server_message(spec);
        msg.extend_from_slice(&500u32.to_be_bytes());
        msg.extend_from_slice(join_err.to_string().as_bytes());
        let _ = transport.send(MessageEncoding::Base16.encode(&msg)).await;
        transport.close().await;
        return;
    }

    info!(client = client_id, lobby = lobby_id, "connection upgraded");
}

fn health_handler(manager: Arc<LobbyManager>) -> warp::reply::Response {
    warp::reply::json(&HealthResponse {
        status: true,
        lobby_count: manager.lobby_count() as u32,
    })
    .into_response()
}

fn lobby_state_handler(raw_id: String, manager: Arc<LobbyManager>) -> warp::reply::Response {
    let lobby_id = match raw_id.parse::<u32>() {
        Ok(value) => value,
        Err(e) => {
            return error_reply(
                StatusCode::BAD_REQUEST,
                "Error in lobbyID",
                format!("Error in lobbyID path param: {e}"),
            )
        }
    };

    let Some(lobby) = manager.get_lobby(lobby_id) else {
        return error_reply(
            StatusCode::NOT_FOUND,
            "Lobby not found",
            format!("no lobby with id {lobby_id}"),
        );
    };

    let clients = lobby
        .clients
        .entries()
        .into_iter()
        .map(|(id, client)| ClientResponse {
            id,
            ign: client.ign.clone(),
            origin: client.origin.as_str(),
            state: ClientStateResponse {
                last_known_position: client.state.last_known_position(),
                ms_of_last_message: client.state.ms_of_last_message(),
            },
        })
        .collect();

    warp::reply::json(&LobbyStateResponse {
        colony_id: lobby.colony_id,
        closing: lobby.is_closing(),
        phase: lobby.activity.phase(),
        encoding: lobby.encoding.as_str(),
        clients,
    })
    .into_response()
}

fn get_u32(params: &HashMap<String, String>, key: &str) -> Result<u32, String> {
    let value = params
        .get(key)
        .ok_or_else(|| format!("query param {key} missing"))?;
    value
        .parse::<u32>()
        .map_err(|e| format!("Error in {key} query param: {e}"))
}

fn error_reply(status: StatusCode, public_message: &str, detail: String) -> warp::reply::Response {
    warn!(status = %status, detail = %detail, "request rejected");

    let mut response =
        warp::reply::with_status(public_message.to_owned(), status).into_response();
    if let Ok(value) = HeaderValue::from_str(&detail) {
        response.headers_mut().insert(DEBUG_HEADER, value);
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_routes() -> (
        Arc<LobbyManager>,
        impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone,
    ) {
        let manager = LobbyManager::new(MessageEncoding::Binary);
        let filter = routes(Arc::clone(&manager));
        (manager, filter)
    }

    #[tokio::test]
    async fn health_reports_the_lobby_count() {
        let (manager, filter) = test_routes();
        manager.create_lobby(7, 42, MessageEncoding::Binary).unwrap();

        let response = warp::test::request()
            .method("GET")
            .path("/health")
            .reply(&filter)
            .await;

        assert_eq!(response.status(), StatusCode::OK);
        let body: serde_json::Value = serde_json::from_slice(response.body()).unwrap();
        assert_eq!(body["status"], true);
        assert_eq!(body["lobbyCount"], 1);
    }

    #[tokio::test]
    async fn create_lobby_returns_the_id() {
        let (_manager, filter) = test_routes();

        let response = warp::test::request()
            .method("POST")
            .path("/create-lobby?ownerID=7&colonyID=42")
            .reply(&filter)
            .await;

        assert_eq!(response.status(), StatusCode::OK);
        let body: serde_json::Value = serde_json::from_slice(response.body()).unwrap();
        assert_eq!(body["id"], 1);
    }

    #[tokio::test]
    async fn create_lobby_is_idempotent_per_colony() {
        let (_manager, filter) = test_routes();

        for _ in 0..2 {
            let response = warp::test::request()
                .method("POST")
                .path("/create-lobby?ownerID=7&colonyID=42")
                .reply(&filter)
                .await;
            let body: serde_json::Value = serde_json::from_slice(response.body()).unwrap();
            assert_eq!(body["id"], 1);
        }
    }

    #[tokio::test]
    async fn create_lobby_rejects_bad_params() {
        let (_manager, filter) = test_routes();

        let response = warp::test::request()
            .method("POST")
            .path("/create-lobby?ownerID=seven&colonyID=42")
            .reply(&filter)
            .await;

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(response.headers().contains_key(DEBUG_HEADER));
    }

    #[tokio::test]
    async fn create_lobby_rejects_the_reserved_owner_id() {
        let (_manager, filter) = test_routes();

        let response = warp::test::request()
            .method("POST")
            .path(&format!("/create-lobby?ownerID={SERVER_ID}&colonyID=42"))
            .reply(&filter)
            .await;

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn lobby_snapshot_covers_the_state() {
        let (manager, filter) = test_routes();
        let lobby = manager.create_lobby(7, 42, MessageEncoding::Binary).unwrap();

        let (transport, _remote) = crate::transport::testing::pair();
        manager
            .join_lobby(lobby.id, 7, "owner".to_owned(), transport)
            .await
            .unwrap();

        let response = warp::test::request()
            .method("GET")
            .path(&format!("/lobby/{}", lobby.id))
            .reply(&filter)
            .await;

        assert_eq!(response.status(), StatusCode::OK);
        let body: serde_json::Value = serde_json::from_slice(response.body()).unwrap();
        assert_eq!(body["colonyID"], 42);
        assert_eq!(body["closing"], false);
        assert_eq!(body["phase"], "idle");
        assert_eq!(body["encoding"], "binary");
        assert_eq!(body["clients"][0]["id"], 7);
        assert_eq!(body["clients"][0]["type"], "owner");
    }

    #[tokio::test]
    async fn lobby_snapshot_rejects_unknown_and_malformed_ids() {
        let (_manager, filter) = test_routes();

        let missing = warp::test::request()
            .method("GET")
            .path("/lobby/999")
            .reply(&filter)
            .await;
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);

        let malformed = warp::test::request()
            .method("GET")
            .path("/lobby/not-a-number")
            .reply(&filter)
            .await;
        assert_eq!(malformed.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn connect_validates_before_upgrading() {
        let (_manager, filter) = test_routes();

        // no IGN
        let response = warp::test::request()
            .method("GET")
            .path("/connect?lobbyID=1&clientID=8&colonyID=42&ownerID=7")
            .header("connection", "upgrade")
            .header("upgrade", "websocket")
            .header("sec-websocket-version", "13")
            .header("sec-websocket-key", "dGhlIHNhbXBsZSBub25jZQ==")
            .reply(&filter)
            .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        // lobby was never allocated
        let response = warp::test::request()
            .method("GET")
            .path("/connect?lobbyID=99999&clientID=8&colonyID=42&ownerID=7&IGN=guest")
            .header("connection", "upgrade")
            .header("upgrade", "websocket")
            .header("sec-websocket-version", "13")
            .header("sec-websocket-key", "dGhlIHNhbXBsZSBub25jZQ==")
            .reply(&filter)
            .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
