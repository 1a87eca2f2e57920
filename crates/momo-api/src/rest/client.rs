use std::fmt;

use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;
use url::Url;

use crate::Error;
use crate::models::{
    ChatMessage, ChatRoom, Employee, NewChatMessage, NewDirectChat, NewRequest, RecordId,
    RequestItem, RequestStatus, TaskAssignment,
};
use crate::transport::TransportConfig;

// ── Error response shape ─────────────────────────────────────────────

#[derive(serde::Deserialize)]
struct ErrorResponse {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// Which side of a request the signed-in user is on.
///
/// Managers see requests they sent; employees see requests addressed to them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserRole {
    Manager,
    Employee,
}

impl UserRole {
    fn path_segment(self) -> &'static str {
        match self {
            Self::Manager => "manager",
            Self::Employee => "employee",
        }
    }
}

impl fmt::Display for UserRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.path_segment())
    }
}

// ── Client ───────────────────────────────────────────────────────────

/// Async client for the Momo REST API.
///
/// Every call returns a full snapshot of one collection; merging is the
/// caller's business.
#[derive(Debug, Clone)]
pub struct RestClient {
    http: reqwest::Client,
    base_url: Url,
}

impl RestClient {
    // ── Constructors ─────────────────────────────────────────────────

    /// Build a client that authenticates every request with `token`.
    pub fn with_token(
        base_url: &Url,
        token: &SecretString,
        transport: &TransportConfig,
    ) -> Result<Self, Error> {
        let mut headers = HeaderMap::new();
        let mut value = HeaderValue::from_str(&format!("Bearer {}", token.expose_secret()))
            .map_err(|e| Error::AuthRejected {
                message: format!("invalid bearer token header value: {e}"),
            })?;
        value.set_sensitive(true);
        headers.insert(AUTHORIZATION, value);

        let http = transport.build_client_with_headers(headers)?;
        Ok(Self::with_client(http, base_url))
    }

    /// Wrap an existing `reqwest::Client` (caller manages auth headers).
    pub fn with_client(http: reqwest::Client, base_url: &Url) -> Self {
        let mut base_url = base_url.clone();
        let path = base_url.path().trim_end_matches('/').to_owned();
        base_url.set_path(&format!("{path}/"));
        Self { http, base_url }
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    // ── Chats ────────────────────────────────────────────────────────

    /// `GET /api/chats`: every chat the user is a member of.
    pub async fn list_chats(&self) -> Result<Vec<ChatRoom>, Error> {
        self.get("api/chats").await
    }

    /// `GET /api/chats/{chatId}/messages`: full history, oldest first.
    pub async fn list_messages(&self, chat_id: &RecordId) -> Result<Vec<ChatMessage>, Error> {
        self.get(&format!("api/chats/{chat_id}/messages")).await
    }

    /// `POST /api/chats/{chatId}/messages`: returns the stored message.
    pub async fn send_message(&self, chat_id: &RecordId, text: &str) -> Result<ChatMessage, Error> {
        self.post(
            &format!("api/chats/{chat_id}/messages"),
            &NewChatMessage { text },
        )
        .await
    }

    /// `POST /api/chats/direct`: the manager/employee chat, created on
    /// first use. Returns the existing room if there already is one.
    pub async fn create_direct_chat(
        &self,
        manager_id: &RecordId,
        employee_id: &RecordId,
    ) -> Result<ChatRoom, Error> {
        self.post(
            "api/chats/direct",
            &NewDirectChat {
                manager_id,
                employee_id,
            },
        )
        .await
    }

    // ── Requests & assignments ───────────────────────────────────────

    pub async fn list_requests(
        &self,
        role: UserRole,
        user_id: &RecordId,
    ) -> Result<Vec<RequestItem>, Error> {
        self.get(&format!("api/requests/{role}/{user_id}")).await
    }

    /// `POST /api/requests`: returns the stored request.
    pub async fn create_request(&self, request: &NewRequest<'_>) -> Result<RequestItem, Error> {
        self.post("api/requests", request).await
    }

    /// `PATCH /api/requests/{id}?status=`: approve or reject.
    pub async fn update_request_status(
        &self,
        request_id: &RecordId,
        status: RequestStatus,
    ) -> Result<RequestItem, Error> {
        self.patch_with_params(
            &format!("api/requests/{request_id}"),
            &[("status", status)],
        )
        .await
    }

    pub async fn list_assignments(
        &self,
        employee_id: &RecordId,
    ) -> Result<Vec<TaskAssignment>, Error> {
        self.get(&format!("api/task-assignments/employee/{employee_id}"))
            .await
    }

    // ── Employees ────────────────────────────────────────────────────

    /// `GET /api/employees/unassigned?query=`: employees without a manager.
    pub async fn search_unassigned_employees(&self, query: &str) -> Result<Vec<Employee>, Error> {
        self.get_with_params("api/employees/unassigned", &[("query", query)])
            .await
    }

    // ── HTTP verbs ───────────────────────────────────────────────────

    fn url(&self, path: &str) -> Result<Url, Error> {
        Ok(self.base_url.join(path)?)
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, Error> {
        let url = self.url(path)?;
        debug!("GET {url}");

        let resp = self.http.get(url).send().await?;
        handle_response(resp).await
    }

    async fn get_with_params<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, &str)],
    ) -> Result<T, Error> {
        let url = self.url(path)?;
        debug!("GET {url} params={params:?}");

        let resp = self.http.get(url).query(params).send().await?;
        handle_response(resp).await
    }

    async fn post<T: DeserializeOwned, B: Serialize + Sync>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, Error> {
        let url = self.url(path)?;
        debug!("POST {url}");

        let resp = self.http.post(url).json(body).send().await?;
        handle_response(resp).await
    }

    async fn patch_with_params<T: DeserializeOwned, Q: Serialize + Sync>(
        &self,
        path: &str,
        params: &Q,
    ) -> Result<T, Error> {
        let url = self.url(path)?;
        debug!("PATCH {url}");

        let resp = self.http.patch(url).query(params).send().await?;
        handle_response(resp).await
    }
}

// ── Response handling ────────────────────────────────────────────────

async fn handle_response<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T, Error> {
    let status = resp.status();
    if status.is_success() {
        let body = resp.text().await?;
        serde_json::from_str(&body).map_err(|e| {
            let preview: String = body.chars().take(200).collect();
            Error::Deserialization {
                message: format!("{e} (body preview: {preview:?})"),
                body,
            }
        })
    } else {
        Err(parse_error(status, resp).await)
    }
}

async fn parse_error(status: reqwest::StatusCode, resp: reqwest::Response) -> Error {
    let raw = resp.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorResponse>(&raw)
        .ok()
        .and_then(|err| err.message.or(err.error))
        .unwrap_or_else(|| {
            if raw.is_empty() {
                status.to_string()
            } else {
                raw
            }
        });

    if matches!(status.as_u16(), 401 | 403) {
        return Error::AuthRejected { message };
    }
    Error::Api {
        status: status.as_u16(),
        message,
    }
}
