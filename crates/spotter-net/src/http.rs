//! `reqwest`-backed implementation of [`ChatApi`].

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use spotter_shared::protocol::{
    EditMessageRequest, HealthResponse, PostMessageRequest, RoomSummary, RoomUpdate,
    ServerMessage,
};
use spotter_shared::{CanonicalId, ConversationId};

use crate::api::ChatApi;
use crate::error::{NetError, Result};

#[derive(Debug, Clone)]
pub struct HttpChatApi {
    client: Client,
    base_url: String,
}

impl HttpChatApi {
    /// Build a client for `base_url` (e.g. `https://api.example.com/v1`).
    ///
    /// `request_timeout` bounds every request at the transport level; the
    /// engine applies its own send timeout on top.
    pub fn new(base_url: &str, request_timeout: Duration) -> Result<Self> {
        let base_url = base_url.trim().trim_end_matches('/').to_string();
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(NetError::InvalidUrl(base_url));
        }
        let client = Client::builder().timeout(request_timeout).build()?;
        Ok(Self { client, base_url })
    }

    pub fn with_client(client: Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim().trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

/// Map non-2xx responses to [`NetError::Status`].
async fn check(resp: Response) -> Result<Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    warn!(status = status.as_u16(), "Backend returned error status");
    Err(NetError::Status {
        status: status.as_u16(),
        body,
    })
}

async fn json<T: DeserializeOwned>(resp: Response) -> Result<T> {
    let bytes = check(resp).await?.bytes().await?;
    serde_json::from_slice(&bytes).map_err(|e| NetError::Decode(e.to_string()))
}

#[async_trait]
impl ChatApi for HttpChatApi {
    async fn list_rooms(&self) -> Result<Vec<RoomSummary>> {
        let resp = self.client.get(self.url("/rooms")).send().await?;
        json(resp).await
    }

    async fn room_messages(&self, room: &ConversationId) -> Result<Vec<ServerMessage>> {
        let resp = self
            .client
            .get(self.url(&format!("/rooms/{room}/messages")))
            .send()
            .await?;
        json(resp).await
    }

    async fn post_message(&self, request: &PostMessageRequest) -> Result<ServerMessage> {
        debug!(room = %request.room_id, "POST /messages");
        let resp = self
            .client
            .post(self.url("/messages"))
            .json(request)
            .send()
            .await?;
        let message: ServerMessage = json(resp).await?;
        if message.id.as_str().is_empty() {
            return Err(NetError::Decode("response carried an empty message id".into()));
        }
        Ok(message)
    }

    async fn update_room(&self, room: &ConversationId, update: &RoomUpdate) -> Result<()> {
        let resp = self
            .client
            .put(self.url(&format!("/rooms/{room}")))
            .json(update)
            .send()
            .await?;
        check(resp).await?;
        Ok(())
    }

    async fn edit_message(&self, id: &CanonicalId, edit: &EditMessageRequest) -> Result<()> {
        let resp = self
            .client
            .put(self.url(&format!("/messages/{id}")))
            .json(edit)
            .send()
            .await?;
        check(resp).await?;
        Ok(())
    }

    async fn delete_message(&self, id: &CanonicalId) -> Result<()> {
        let resp = self
            .client
            .delete(self.url(&format!("/messages/{id}")))
            .send()
            .await?;
        check(resp).await?;
        Ok(())
    }

    async fn health(&self) -> Result<()> {
        let resp = self.client.get(self.url("/health")).send().await?;
        let health: HealthResponse = json(resp).await?;
        if health.status == "ok" {
            Ok(())
        } else {
            Err(NetError::Decode(format!("health status {}", health.status)))
        }
    }
}
