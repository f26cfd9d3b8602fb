//! Typed wrapper over the Matrix Client-Server API.
//!
//! Business code never touches raw HTTP verbs; every homeserver interaction
//! the bridge performs goes through a method here.

use super::types::{
    CreateRoomRequest, CreateRoomResponse, DisplayNameResponse, EventIdResponse,
    JoinResponse, JoinedMembersResponse, JoinedRoomsResponse, LoginRequest, RegisterRequest,
    RoomMessageContent, Session, SyncResponse,
};
use crate::error::{BridgeError, BridgeResult, JoinError};
use crate::retry::{retry_with_config, RetryConfig};
use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use std::time::Duration;
use url::Url;

/// Default per-call timeout for homeserver requests.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Typed Matrix homeserver client.
///
/// The client itself is account-agnostic; callers pass the access token of
/// whichever identity (main bot, admin, or an agent) the call should be
/// attributed to.
#[derive(Debug, Clone)]
pub struct HomeserverClient {
    http: reqwest::Client,
    base_url: Url,
    retry_config: RetryConfig,
}

impl HomeserverClient {
    /// Create a new homeserver client.
    pub fn new(base_url: Url) -> BridgeResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .pool_max_idle_per_host(50)
            .pool_idle_timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            http,
            base_url,
            retry_config: RetryConfig::default(),
        })
    }

    /// Get the base URL.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Set the retry configuration.
    pub fn set_retry_config(&mut self, config: RetryConfig) {
        self.retry_config = config;
    }

    /// Build a URL from path segments, percent-encoding each segment.
    fn endpoint(&self, segments: &[&str]) -> BridgeResult<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| BridgeError::config("homeserver URL cannot be a base"))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn bearer(token: &str) -> BridgeResult<HeaderMap> {
        let mut headers = HeaderMap::new();
        let value = HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|_| BridgeError::auth("Invalid access token format"))?;
        headers.insert(AUTHORIZATION, value);
        Ok(headers)
    }

    async fn check_response<T>(
        response: reqwest::Response,
        url: &Url,
        method: &str,
    ) -> BridgeResult<T>
    where
        T: serde::de::DeserializeOwned,
    {
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await?;
            return Err(BridgeError::from_matrix_response(
                status,
                body,
                Some(url.clone()),
                Some(method.to_string()),
            ));
        }
        Ok(response.json().await?)
    }

    /// Log in with a password, returning the session token.
    #[tracing::instrument(skip(self, password), fields(user = %user))]
    pub async fn login(&self, user: &str, password: &str) -> BridgeResult<Session> {
        let url = self.endpoint(&["_matrix", "client", "v3", "login"])?;
        let request = LoginRequest::password(user, password);

        let response = self.http.post(url.clone()).json(&request).send().await?;
        Self::check_response(response, &url, "POST").await
    }

    /// Register a new account with the no-challenge auth stanza.
    ///
    /// A `M_USER_IN_USE` conflict surfaces as a [`BridgeError::Matrix`] whose
    /// errcode the caller can inspect.
    #[tracing::instrument(skip(self, password), fields(localpart = %localpart))]
    pub async fn register(&self, localpart: &str, password: &str) -> BridgeResult<Session> {
        let url = self.endpoint(&["_matrix", "client", "v3", "register"])?;
        let request = RegisterRequest::new(localpart, password);

        let response = self.http.post(url.clone()).json(&request).send().await?;
        Self::check_response(response, &url, "POST").await
    }

    /// Create a room, returning its id.
    #[tracing::instrument(skip(self, request, token))]
    pub async fn create_room(
        &self,
        request: &CreateRoomRequest,
        token: &str,
    ) -> BridgeResult<String> {
        let url = self.endpoint(&["_matrix", "client", "r0", "createRoom"])?;
        let headers = Self::bearer(token)?;

        let response = self
            .http
            .post(url.clone())
            .headers(headers)
            .json(request)
            .send()
            .await?;
        let created: CreateRoomResponse = Self::check_response(response, &url, "POST").await?;
        Ok(created.room_id)
    }

    /// Send a message event, returning the new event id.
    ///
    /// Uses a PUT with a fresh v4 UUID transaction id; a txn id is never
    /// reused, so a retried PUT cannot double-deliver.
    #[tracing::instrument(skip(self, content, token), fields(room_id = %room_id))]
    pub async fn send_message(
        &self,
        room_id: &str,
        content: &RoomMessageContent,
        token: &str,
    ) -> BridgeResult<String> {
        let txn_id = uuid::Uuid::new_v4().to_string();
        let url = self.endpoint(&[
            "_matrix",
            "client",
            "v3",
            "rooms",
            room_id,
            "send",
            "m.room.message",
            &txn_id,
        ])?;

        retry_with_config(&self.retry_config, || async {
            let headers = Self::bearer(token)?;
            let response = self
                .http
                .put(url.clone())
                .headers(headers)
                .json(content)
                .send()
                .await?;
            let event: EventIdResponse = Self::check_response(response, &url, "PUT").await?;
            Ok(event.event_id)
        })
        .await
    }

    /// Send a plain text message.
    pub async fn send_text(&self, room_id: &str, body: &str, token: &str) -> BridgeResult<String> {
        self.send_message(room_id, &RoomMessageContent::text(body), token)
            .await
    }

    /// Redact an event.
    #[tracing::instrument(skip(self, token), fields(room_id = %room_id, event_id = %event_id))]
    pub async fn redact(
        &self,
        room_id: &str,
        event_id: &str,
        reason: Option<&str>,
        token: &str,
    ) -> BridgeResult<String> {
        let txn_id = uuid::Uuid::new_v4().to_string();
        let url = self.endpoint(&[
            "_matrix", "client", "v3", "rooms", room_id, "redact", event_id, &txn_id,
        ])?;
        let body = match reason {
            Some(reason) => serde_json::json!({ "reason": reason }),
            None => serde_json::json!({}),
        };

        retry_with_config(&self.retry_config, || async {
            let headers = Self::bearer(token)?;
            let response = self
                .http
                .put(url.clone())
                .headers(headers)
                .json(&body)
                .send()
                .await?;
            let event: EventIdResponse = Self::check_response(response, &url, "PUT").await?;
            Ok(event.event_id)
        })
        .await
    }

    /// Write a state event.
    #[tracing::instrument(skip(self, content, token), fields(room_id = %room_id, event_type = %event_type))]
    pub async fn put_state(
        &self,
        room_id: &str,
        event_type: &str,
        state_key: &str,
        content: &serde_json::Value,
        token: &str,
    ) -> BridgeResult<()> {
        let url = self.endpoint(&[
            "_matrix", "client", "r0", "rooms", room_id, "state", event_type, state_key,
        ])?;

        retry_with_config(&self.retry_config, || async {
            let headers = Self::bearer(token)?;
            let response = self
                .http
                .put(url.clone())
                .headers(headers)
                .json(content)
                .send()
                .await?;
            let _: serde_json::Value = Self::check_response(response, &url, "PUT").await?;
            Ok(())
        })
        .await
    }

    /// Read a single state event's content.
    #[tracing::instrument(skip(self, token), fields(room_id = %room_id, event_type = %event_type))]
    pub async fn get_state(
        &self,
        room_id: &str,
        event_type: &str,
        state_key: &str,
        token: &str,
    ) -> BridgeResult<serde_json::Value> {
        let url = self.endpoint(&[
            "_matrix", "client", "r0", "rooms", room_id, "state", event_type, state_key,
        ])?;
        let headers = Self::bearer(token)?;

        let response = self.http.get(url.clone()).headers(headers).send().await?;
        Self::check_response(response, &url, "GET").await
    }

    /// Read a room's full state. Used for existence probing.
    pub async fn get_room_state(
        &self,
        room_id: &str,
        token: &str,
    ) -> BridgeResult<serde_json::Value> {
        let url = self.endpoint(&["_matrix", "client", "r0", "rooms", room_id, "state"])?;
        let headers = Self::bearer(token)?;

        let response = self.http.get(url.clone()).headers(headers).send().await?;
        Self::check_response(response, &url, "GET").await
    }

    /// List rooms the account has joined.
    pub async fn joined_rooms(&self, token: &str) -> BridgeResult<Vec<String>> {
        let url = self.endpoint(&["_matrix", "client", "v3", "joined_rooms"])?;

        retry_with_config(&self.retry_config, || async {
            let headers = Self::bearer(token)?;
            let response = self.http.get(url.clone()).headers(headers).send().await?;
            let joined: JoinedRoomsResponse = Self::check_response(response, &url, "GET").await?;
            Ok(joined.joined_rooms)
        })
        .await
    }

    /// List members currently joined to a room.
    pub async fn joined_members(&self, room_id: &str, token: &str) -> BridgeResult<Vec<String>> {
        let url = self.endpoint(&[
            "_matrix",
            "client",
            "v3",
            "rooms",
            room_id,
            "joined_members",
        ])?;

        retry_with_config(&self.retry_config, || async {
            let headers = Self::bearer(token)?;
            let response = self.http.get(url.clone()).headers(headers).send().await?;
            let members: JoinedMembersResponse =
                Self::check_response(response, &url, "GET").await?;
            Ok(members.joined.keys().cloned().collect())
        })
        .await
    }

    /// Join a room. Failures map to the typed [`JoinError`] variants.
    #[tracing::instrument(skip(self, token), fields(room = %room_id_or_alias))]
    pub async fn join_room(&self, room_id_or_alias: &str, token: &str) -> BridgeResult<String> {
        let url = self.endpoint(&[
            "_matrix",
            "client",
            "v3",
            "rooms",
            room_id_or_alias,
            "join",
        ])?;
        let headers = Self::bearer(token)?;

        let response = self
            .http
            .post(url.clone())
            .headers(headers)
            .json(&serde_json::json!({}))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await?;
            let parsed = crate::error::ErrorBody::from_response(&body);
            let message = parsed.message().unwrap_or_else(|| body.clone());

            // A 403 that says the user is already present counts as joined.
            if status == 403
                && (message.contains("already in the room") || message.contains("already joined"))
            {
                return Ok(room_id_or_alias.to_string());
            }

            return Err(BridgeError::Join(JoinError::from_response(
                status,
                parsed.code().as_deref(),
                message,
            )));
        }

        let joined: JoinResponse = response.json().await?;
        Ok(joined.room_id)
    }

    /// Get a user's display name.
    pub async fn get_display_name(&self, user_id: &str) -> BridgeResult<Option<String>> {
        let url = self.endpoint(&["_matrix", "client", "v3", "profile", user_id, "displayname"])?;

        let response = self.http.get(url.clone()).send().await?;
        let profile: DisplayNameResponse = Self::check_response(response, &url, "GET").await?;
        Ok(profile.displayname)
    }

    /// Set a user's display name using the given token.
    #[tracing::instrument(skip(self, token), fields(user_id = %user_id))]
    pub async fn set_display_name(
        &self,
        user_id: &str,
        display_name: &str,
        token: &str,
    ) -> BridgeResult<()> {
        let url = self.endpoint(&["_matrix", "client", "v3", "profile", user_id, "displayname"])?;

        retry_with_config(&self.retry_config, || async {
            let headers = Self::bearer(token)?;
            let response = self
                .http
                .put(url.clone())
                .headers(headers)
                .json(&serde_json::json!({ "displayname": display_name }))
                .send()
                .await?;
            let _: serde_json::Value = Self::check_response(response, &url, "PUT").await?;
            Ok(())
        })
        .await
    }

    /// Download media through the authenticated endpoint.
    #[tracing::instrument(skip(self, token), fields(server = %server, media_id = %media_id))]
    pub async fn download_media(
        &self,
        server: &str,
        media_id: &str,
        token: &str,
    ) -> BridgeResult<Bytes> {
        let url = self.endpoint(&[
            "_matrix", "client", "v1", "media", "download", server, media_id,
        ])?;
        let headers = Self::bearer(token)?;

        let response = self
            .http
            .get(url.clone())
            .headers(headers)
            // Media can be large; give transfers more room than API calls.
            .timeout(Duration::from_secs(120))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await?;
            return Err(BridgeError::from_matrix_response(
                status,
                body,
                Some(url),
                Some("GET".to_string()),
            ));
        }

        Ok(response.bytes().await?)
    }

    /// Set or clear the typing indicator for a user in a room.
    ///
    /// When clearing, a second send of `typing=true` with a 1 ms timeout
    /// forces expiry on servers that ignore `typing=false`.
    #[tracing::instrument(skip(self, token), fields(room_id = %room_id, typing))]
    pub async fn set_typing(
        &self,
        room_id: &str,
        user_id: &str,
        typing: bool,
        timeout_ms: u64,
        token: &str,
    ) -> BridgeResult<()> {
        let url = self.endpoint(&["_matrix", "client", "v3", "rooms", room_id, "typing", user_id])?;
        let headers = Self::bearer(token)?;

        // Per spec the timeout field is only included when typing is set.
        let body = if typing {
            serde_json::json!({ "typing": true, "timeout": timeout_ms })
        } else {
            serde_json::json!({ "typing": false })
        };

        let response = self
            .http
            .put(url.clone())
            .headers(headers.clone())
            .json(&body)
            .send()
            .await?;
        let _: serde_json::Value = Self::check_response(response, &url, "PUT").await?;

        if !typing {
            let expire = serde_json::json!({ "typing": true, "timeout": 1 });
            let response = self
                .http
                .put(url.clone())
                .headers(headers)
                .json(&expire)
                .send()
                .await?;
            let _: serde_json::Value = Self::check_response(response, &url, "PUT").await?;
        }

        Ok(())
    }

    /// Perform one sync round trip.
    #[tracing::instrument(skip(self, filter, token), fields(has_since = since.is_some()))]
    pub async fn sync(
        &self,
        since: Option<&str>,
        filter: &serde_json::Value,
        timeout_ms: u64,
        token: &str,
    ) -> BridgeResult<SyncResponse> {
        let mut url = self.endpoint(&["_matrix", "client", "v3", "sync"])?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("filter", &filter.to_string());
            query.append_pair("timeout", &timeout_ms.to_string());
            if let Some(since) = since {
                query.append_pair("since", since);
            }
        }
        let headers = Self::bearer(token)?;

        let response = self
            .http
            .get(url.clone())
            .headers(headers)
            // Long-poll: the server holds the request up to timeout_ms.
            .timeout(Duration::from_millis(timeout_ms) + DEFAULT_TIMEOUT)
            .send()
            .await?;
        Self::check_response(response, &url, "GET").await
    }
}
