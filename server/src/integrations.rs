// Outbound calls to the main game backend. The only one the lobby runtime
// needs is the colony-close callback used to reconcile a perceived-state
// desync: a join aimed at a lobby this process never allocated means the
// upstream still believes the colony is open.

use std::sync::OnceLock;

use tracing::{debug, error};

use protocol::{ClientId, ColonyId};

pub struct MainBackendClient {
    base_url: String,
    token: Option<String>,
    http: reqwest::Client,
}

static MAIN_BACKEND: OnceLock<Option<MainBackendClient>> = OnceLock::new();

/// Wires up the main-backend client once at startup. Deployments without an
/// upstream (and the test suite) simply leave it unconfigured.
pub fn init_main_backend(base_url: Option<String>, token: Option<String>) {
    let client = base_url.map(|url| MainBackendClient {
        base_url: url.trim_end_matches('/').to_owned(),
        token,
        http: reqwest::Client::new(),
    });

    if MAIN_BACKEND.set(client).is_err() {
        debug!("main backend client already initialized");
    }
}

impl MainBackendClient {
    /// Asks the upstream to close a colony. An error response for an
    /// already-closed colony is expected and uninteresting.
    pub async fn close_colony(
        &self,
        colony_id: ColonyId,
        colony_owner_id: ClientId,
    ) -> Result<(), reqwest::Error> {
        let url = format!("{}/colony/{}/close", self.base_url, colony_id);
        let mut request = self
            .http
            .post(&url)
            .query(&[("ownerID", colony_owner_id)]);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        debug!(colony = colony_id, status = %response.status(), "colony close requested");
        Ok(())
    }
}

/// Fire-and-forget colony close. Never blocks the caller; failures are
/// logged and dropped.
pub fn close_colony_fire_and_forget(colony_id: ColonyId, colony_owner_id: ClientId) {
    let Some(Some(backend)) = MAIN_BACKEND.get() else {
        debug!(colony = colony_id, "main backend not configured, skipping colony close");
        return;
    };

    tokio::spawn(async move {
        if let Err(e) = backend.close_colony(colony_id, colony_owner_id).await {
            error!(colony = colony_id, error = %e, "colony close request failed");
        }
    });
}
