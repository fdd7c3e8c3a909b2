//! Microsoft 365 provider implementation.
//!
//! This module provides an [`EmailProvider`] implementation on top of the
//! Microsoft Graph REST API.
//!
//! # Authentication
//!
//! Tokens come from the Microsoft identity platform through `oauth2`:
//!
//! - with a client secret, the client-credentials grant (app-only token,
//!   `https://graph.microsoft.com/.default`)
//! - without one, the device-code grant (delegated token for `Mail.ReadWrite`
//!   and `Mail.Send`); the verification URL and code are printed to stderr
//!
//! # API Usage
//!
//! - `GET  /me/mailFolders` as the connectivity probe
//! - `GET  /me/mailFolders/{folder}/messages` for listing
//! - `POST /me/messages/{id}/move`, `PATCH /me/messages/{id}`,
//!   `DELETE /me/messages/{id}` for mutations
//!
//! `/me` becomes `/users/{username}` when a username is configured, which
//! app-only tokens require.

use async_trait::async_trait;
use oauth2::basic::BasicClient;
use oauth2::reqwest::async_http_client;
use oauth2::{
    AuthType, AuthUrl, ClientId, ClientSecret, DeviceAuthorizationUrl, Scope,
    StandardDeviceAuthorizationResponse, TokenResponse, TokenUrl,
};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::Method;
use serde::{Deserialize, Serialize};
use url::Url;

use super::{EmailProvider, ProviderError, Result, MAILBOX_TIMEOUT};
use crate::config::{keys, ProviderKind, ResolvedConfig};
use crate::domain::{make_preview, Email, EmailId, Sender};
use crate::providers::PROBE_TIMEOUT;

/// Graph API root.
pub const GRAPH_API_BASE: &str = "https://graph.microsoft.com/v1.0";

const LOGIN_AUTHORITY: &str = "https://login.microsoftonline.com";
const DEFAULT_TENANT: &str = "common";
const APP_SCOPE: &str = "https://graph.microsoft.com/.default";
const DELEGATED_SCOPES: [&str; 2] = ["Mail.ReadWrite", "Mail.Send"];

/// Message fields requested when listing.
const MESSAGE_FIELDS: &str = "id,subject,from,bodyPreview,receivedDateTime,isRead";

/// Folder names Graph accepts in place of a folder id.
const WELL_KNOWN_FOLDERS: &[&str] = &[
    "inbox",
    "archive",
    "deleteditems",
    "drafts",
    "junkemail",
    "sentitems",
    "outbox",
    "clutter",
    "msgfolderroot",
];

/// Graph collection response.
#[derive(Debug, Deserialize)]
struct GraphList<T> {
    #[serde(default = "Vec::new")]
    value: Vec<T>,
}

/// Graph message resource (only the fields we select).
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphMessage {
    id: String,
    subject: Option<String>,
    from: Option<GraphRecipient>,
    body_preview: Option<String>,
    received_date_time: Option<String>,
    #[serde(default)]
    is_read: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphRecipient {
    email_address: GraphEmailAddress,
}

#[derive(Debug, Deserialize)]
struct GraphEmailAddress {
    name: Option<String>,
    address: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GraphFolder {
    id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct MoveRequest<'a> {
    destination_id: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ReadUpdate {
    is_read: bool,
}

/// Graph error envelope.
#[derive(Debug, Deserialize)]
struct GraphError {
    error: GraphErrorDetail,
}

#[derive(Debug, Deserialize)]
struct GraphErrorDetail {
    code: String,
    message: String,
}

/// Whose mailbox the REST calls address.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Mailbox {
    Me,
    User(String),
}

impl Mailbox {
    fn segments(&self) -> Vec<&str> {
        match self {
            Mailbox::Me => vec!["me"],
            Mailbox::User(user) => vec!["users", user.as_str()],
        }
    }
}

/// Microsoft 365 / Outlook provider over Microsoft Graph.
///
/// # Example
///
/// ```ignore
/// use inbox_assistant::providers::email::{EmailProvider, Office365Provider};
///
/// let provider = Office365Provider::connect(&config).await?;
/// let emails = provider.get_emails("inbox", 50).await?;
/// ```
pub struct Office365Provider {
    /// HTTP client for API requests.
    client: reqwest::Client,
    /// Graph root, overridable for tests.
    api_base: String,
    /// `/me` or `/users/{name}`.
    mailbox: Mailbox,
    /// OAuth access token.
    access_token: String,
}

impl Office365Provider {
    /// Creates a provider around an already-acquired access token.
    pub fn with_access_token(access_token: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_base: GRAPH_API_BASE.to_string(),
            mailbox: Mailbox::Me,
            access_token: access_token.into(),
        }
    }

    /// Targets another user's mailbox instead of `/me`.
    pub fn for_user(mut self, username: impl Into<String>) -> Self {
        self.mailbox = Mailbox::User(username.into());
        self
    }

    /// Overrides the Graph root (sovereign clouds, test servers).
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    /// Authenticates against the tenant named in `config` and returns a ready
    /// provider.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::Config`] when `client_id` is missing and
    /// [`ProviderError::Authentication`] when no token could be obtained.
    pub async fn connect(config: &ResolvedConfig) -> Result<Self> {
        let client_id = config.require(keys::O365_CLIENT_ID)?;
        let tenant = config.get_or(keys::O365_TENANT_ID, DEFAULT_TENANT);
        let secret = config
            .get(keys::O365_CLIENT_SECRET)
            .filter(|s| !s.trim().is_empty());

        let token = match secret {
            Some(secret) => acquire_app_token(client_id, secret, tenant).await?,
            None => acquire_device_token(client_id, tenant).await?,
        };
        tracing::info!(tenant = %tenant, "Authenticated with Office 365");

        let provider = Self::with_access_token(token);
        Ok(match config.get(keys::EMAIL_USERNAME) {
            Some(user) if !user.trim().is_empty() => provider.for_user(user.trim()),
            _ => provider,
        })
    }

    /// Builds an absolute URL below the mailbox root.
    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = Url::parse(&self.api_base)
            .map_err(|e| ProviderError::Internal(format!("invalid Graph base URL: {}", e)))?;
        url.path_segments_mut()
            .map_err(|_| ProviderError::Internal("Graph base URL cannot be a base".to_string()))?
            .pop_if_empty()
            .extend(self.mailbox.segments())
            .extend(segments);
        Ok(url)
    }

    /// Builds authorization headers for API requests.
    fn auth_headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", self.access_token))
                .map_err(|e| ProviderError::Internal(format!("invalid header: {}", e)))?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Ok(headers)
    }

    /// Makes an authenticated GET request and decodes the body.
    async fn get<T: for<'de> Deserialize<'de>>(&self, url: Url) -> Result<T> {
        let response = self
            .client
            .get(url)
            .headers(self.auth_headers()?)
            .timeout(MAILBOX_TIMEOUT)
            .send()
            .await
            .map_err(transport_error)?;

        if !response.status().is_success() {
            return Err(self.handle_error(response).await);
        }

        response
            .json()
            .await
            .map_err(|e| ProviderError::Internal(format!("parse response: {}", e)))
    }

    /// Makes an authenticated request whose response body is ignored.
    async fn send_no_response<B: Serialize>(
        &self,
        method: Method,
        url: Url,
        body: Option<&B>,
    ) -> Result<()> {
        let mut request = self
            .client
            .request(method, url)
            .headers(self.auth_headers()?)
            .timeout(MAILBOX_TIMEOUT);
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await.map_err(transport_error)?;

        if !response.status().is_success() {
            return Err(self.handle_error(response).await);
        }
        Ok(())
    }

    /// Handles API error responses.
    async fn handle_error(&self, response: reqwest::Response) -> ProviderError {
        let status = response.status();
        let retry_after = response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok());
        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<GraphError>(&body)
            .map(|e| format!("{}: {}", e.error.code, e.error.message))
            .unwrap_or(body);

        match status.as_u16() {
            401 | 403 => ProviderError::Authentication(message),
            404 => ProviderError::NotFound(message),
            429 => ProviderError::RateLimited {
                retry_after_secs: retry_after,
            },
            400 => ProviderError::InvalidRequest(message),
            _ => ProviderError::Provider(format!("Graph API error ({}): {}", status, message)),
        }
    }

    /// Lists mail folders with the short probe timeout.
    async fn probe(&self) -> Result<()> {
        let url = self.endpoint(&["mailFolders"])?;
        let response = self
            .client
            .get(url)
            .headers(self.auth_headers()?)
            .timeout(PROBE_TIMEOUT)
            .send()
            .await
            .map_err(transport_error)?;

        if !response.status().is_success() {
            return Err(self.handle_error(response).await);
        }
        Ok(())
    }

    /// Resolves a folder name to something Graph accepts in a path or as a
    /// move destination.
    ///
    /// Well-known names are used as-is. Anything else is first looked up as
    /// the display name of a top-level folder (child folders are not
    /// searched); when no folder has that name the string is taken to be a
    /// folder id and passed through unchanged, so Graph decides whether it
    /// exists.
    async fn resolve_folder(&self, name: &str) -> Result<String> {
        let trimmed = name.trim();
        let lower = trimmed.to_ascii_lowercase();
        if WELL_KNOWN_FOLDERS.contains(&lower.as_str()) {
            return Ok(lower);
        }

        let mut url = self.endpoint(&["mailFolders"])?;
        url.query_pairs_mut()
            .append_pair(
                "$filter",
                &format!("displayName eq '{}'", trimmed.replace('\'', "''")),
            )
            .append_pair("$select", "id");

        let folders: GraphList<GraphFolder> = self.get(url).await?;
        match folders.value.into_iter().next() {
            Some(folder) => Ok(folder.id),
            None => {
                tracing::debug!(folder = %trimmed, "No folder with that display name, using it as an id");
                Ok(trimmed.to_string())
            }
        }
    }

    fn graph_message_to_email(message: GraphMessage, folder: &str) -> Email {
        let from = message
            .from
            .map(|r| {
                let address = r.email_address.address.unwrap_or_default();
                match r.email_address.name {
                    Some(name) => Sender::with_name(address, name),
                    None => Sender::new(address),
                }
            })
            .unwrap_or_else(|| Sender::new(String::new()));

        Email {
            id: EmailId::from(message.id),
            subject: message.subject.unwrap_or_default(),
            from,
            preview: make_preview(message.body_preview.as_deref().unwrap_or_default()),
            received: message.received_date_time.unwrap_or_default(),
            is_read: message.is_read,
            folder: Some(folder.to_string()),
        }
    }
}

/// Maps a reqwest failure to a provider error.
fn transport_error(e: reqwest::Error) -> ProviderError {
    if e.is_timeout() {
        ProviderError::Timeout(MAILBOX_TIMEOUT)
    } else {
        ProviderError::Connection(e.to_string())
    }
}

fn oauth_client(
    client_id: &str,
    secret: Option<&str>,
    tenant: &str,
) -> Result<BasicClient> {
    let authority = format!("{}/{}", LOGIN_AUTHORITY, tenant);
    let auth_url = AuthUrl::new(format!("{}/oauth2/v2.0/authorize", authority))
        .map_err(|e| ProviderError::InvalidRequest(format!("authority URL: {}", e)))?;
    let token_url = TokenUrl::new(format!("{}/oauth2/v2.0/token", authority))
        .map_err(|e| ProviderError::InvalidRequest(format!("token URL: {}", e)))?;

    Ok(BasicClient::new(
        ClientId::new(client_id.to_string()),
        secret.map(|s| ClientSecret::new(s.to_string())),
        auth_url,
        Some(token_url),
    )
    .set_auth_type(AuthType::RequestBody))
}

/// Client-credentials grant for service principals.
async fn acquire_app_token(client_id: &str, secret: &str, tenant: &str) -> Result<String> {
    let client = oauth_client(client_id, Some(secret), tenant)?;

    let token = client
        .exchange_client_credentials()
        .add_scope(Scope::new(APP_SCOPE.to_string()))
        .request_async(async_http_client)
        .await
        .map_err(|e| ProviderError::Authentication(format!("client credentials: {}", e)))?;

    Ok(token.access_token().secret().clone())
}

/// Device-code grant for interactive sign-in.
async fn acquire_device_token(client_id: &str, tenant: &str) -> Result<String> {
    let device_url = DeviceAuthorizationUrl::new(format!(
        "{}/{}/oauth2/v2.0/devicecode",
        LOGIN_AUTHORITY, tenant
    ))
    .map_err(|e| ProviderError::InvalidRequest(format!("device code URL: {}", e)))?;
    let client = oauth_client(client_id, None, tenant)?.set_device_authorization_url(device_url);

    let details: StandardDeviceAuthorizationResponse = client
        .exchange_device_code()
        .map_err(|e| ProviderError::Internal(format!("device flow: {}", e)))?
        .add_scopes(DELEGATED_SCOPES.iter().map(|s| Scope::new(s.to_string())))
        .request_async(async_http_client)
        .await
        .map_err(|e| ProviderError::Authentication(format!("device code request: {}", e)))?;

    eprintln!(
        "To sign in, open {} and enter the code {}",
        details.verification_uri().as_str(),
        details.user_code().secret()
    );

    let token = client
        .exchange_device_access_token(&details)
        .request_async(async_http_client, tokio::time::sleep, None)
        .await
        .map_err(|e| ProviderError::Authentication(format!("device sign-in: {}", e)))?;

    Ok(token.access_token().secret().clone())
}

#[async_trait]
impl EmailProvider for Office365Provider {
    fn provider_type(&self) -> ProviderKind {
        ProviderKind::Office365
    }

    async fn get_emails(&self, folder: &str, limit: usize) -> Result<Vec<Email>> {
        let folder_id = self.resolve_folder(folder).await?;

        let mut url = self.endpoint(&["mailFolders", &folder_id, "messages"])?;
        url.query_pairs_mut()
            .append_pair("$top", &limit.to_string())
            .append_pair("$select", MESSAGE_FIELDS)
            .append_pair("$orderby", "receivedDateTime DESC");

        let messages: GraphList<GraphMessage> = self.get(url).await?;
        let emails: Vec<Email> = messages
            .value
            .into_iter()
            .take(limit)
            .map(|m| Self::graph_message_to_email(m, folder))
            .collect();

        tracing::debug!(folder = %folder, count = emails.len(), "Fetched Office 365 messages");
        Ok(emails)
    }

    async fn move_email(&self, id: &EmailId, destination: &str) -> Result<()> {
        let destination_id = self.resolve_folder(destination).await?;
        let url = self.endpoint(&["messages", id.as_str(), "move"])?;
        let body = MoveRequest {
            destination_id: &destination_id,
        };
        self.send_no_response(Method::POST, url, Some(&body)).await
    }

    async fn mark_read(&self, id: &EmailId) -> Result<()> {
        let url = self.endpoint(&["messages", id.as_str()])?;
        let body = ReadUpdate { is_read: true };
        self.send_no_response(Method::PATCH, url, Some(&body)).await
    }

    async fn delete_email(&self, id: &EmailId) -> Result<()> {
        let url = self.endpoint(&["messages", id.as_str()])?;
        self.send_no_response::<()>(Method::DELETE, url, None).await
    }

    async fn test_connection(&self) -> bool {
        match self.probe().await {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(error = %e, "Office 365 connection test failed");
                false
            }
        }
    }
}
