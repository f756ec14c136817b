//! HTTP client for the bank data API.
//!
//! Implements [`AccountDataService`] and [`ProfileService`] over HTTP/JSON.
//! Upstream rate limiting (HTTP 429) is an answer, not an error: it maps to
//! the `RateLimited` variant of the call's outcome.

use async_trait::async_trait;
use log::{debug, info, warn};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use std::time::Duration;

use crate::error::{Result, SyncError};
use crate::models::{
    Account, BalanceRefresh, FetchStart, FetchStatus, PreferenceState, Profile, Transaction,
};
use crate::traits::{AccountDataService, ProfileService};

/// Default timeout for API requests.
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Default base URL for the bank data API.
pub const DEFAULT_API_URL: &str = "http://localhost:8080";

// ─────────────────────────────────────────────────────────────────────────────
// API Response Types (internal)
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, serde::Deserialize)]
struct ApiBalanceRefreshResponse {
    #[serde(default)]
    partial: bool,
}

#[derive(Debug, serde::Deserialize)]
struct ApiFetchStatusResponse {
    status: FetchStatus,
}

#[derive(Debug, serde::Deserialize)]
struct ApiAccountsResponse {
    #[serde(default)]
    accounts: Vec<Account>,
}

#[derive(Debug, serde::Deserialize)]
struct ApiTransactionsResponse {
    #[serde(default)]
    transactions: Vec<Transaction>,
}

#[derive(Debug, serde::Serialize)]
struct ApiProfilePatch<'a> {
    preferences: &'a PreferenceState,
}

#[derive(Debug, serde::Deserialize)]
struct ApiErrorResponse {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Bank API Client
// ─────────────────────────────────────────────────────────────────────────────

/// HTTP client for the bank data API.
///
/// # Example
///
/// ```ignore
/// let client = BankApiClient::new("https://api.example.com", "your-token")?;
/// let accounts = client.list_accounts().await?;
/// ```
#[derive(Debug, Clone)]
pub struct BankApiClient {
    client: reqwest::Client,
    base_url: String,
    auth_header: HeaderValue,
}

impl BankApiClient {
    /// Create a new client.
    ///
    /// # Errors
    ///
    /// Returns an error if the access token is not a valid header value or
    /// the HTTP client cannot be initialized.
    pub fn new(base_url: &str, access_token: &str) -> Result<Self> {
        let auth_header = HeaderValue::from_str(&format!("Bearer {}", access_token))
            .map_err(|e| SyncError::transport(format!("Invalid access token format: {}", e)))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()
            .map_err(|e| SyncError::transport(format!("Failed to initialize HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            auth_header,
        })
    }

    fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(AUTHORIZATION, self.auth_header.clone());
        headers
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn fetch_path(connection_id: &str) -> String {
        format!(
            "/api/v1/connections/{}/fetch",
            urlencoding::encode(connection_id)
        )
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = self.url(path);
        debug!("[BankApi] GET {}", url);

        let response = self.client.get(&url).headers(self.headers()).send().await?;
        Self::parse_response(response).await
    }

    async fn post(&self, path: &str) -> Result<reqwest::Response> {
        let url = self.url(path);
        debug!("[BankApi] POST {}", url);

        Ok(self.client.post(&url).headers(self.headers()).send().await?)
    }

    /// Parse a response body, turning non-2xx statuses into [`SyncError::Api`].
    async fn parse_response<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(SyncError::api(status.as_u16(), error_message(status, &body)));
        }

        serde_json::from_str(&body).map_err(|e| {
            SyncError::Decode(format!(
                "{} - {}",
                e,
                body.chars().take(200).collect::<String>()
            ))
        })
    }

    /// Error message of a non-2xx response.
    async fn failure_message(response: reqwest::Response) -> String {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        error_message(status, &body)
    }
}

fn error_message(status: StatusCode, body: &str) -> String {
    if let Ok(err) = serde_json::from_str::<ApiErrorResponse>(body) {
        if let Some(msg) = err.message.or(err.error) {
            return msg;
        }
    }
    if body.trim().is_empty() {
        format!("HTTP {}", status)
    } else {
        body.chars().take(200).collect()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// AccountDataService Trait Implementation
// ─────────────────────────────────────────────────────────────────────────────

#[async_trait]
impl AccountDataService for BankApiClient {
    async fn refresh_balances(&self) -> Result<BalanceRefresh> {
        let response = self.post("/api/v1/accounts/balances/refresh").await?;
        let status = response.status();

        if status == StatusCode::TOO_MANY_REQUESTS {
            warn!("[BankApi] Balance refresh rate limited");
            return Ok(BalanceRefresh::RateLimited);
        }
        if !status.is_success() {
            return Ok(BalanceRefresh::Failed(Self::failure_message(response).await));
        }

        let body = response.text().await?;
        let partial = if body.trim().is_empty() {
            false
        } else {
            serde_json::from_str::<ApiBalanceRefreshResponse>(&body)?.partial
        };
        Ok(BalanceRefresh::Success { partial })
    }

    async fn start_fetch(&self, connection_id: &str) -> Result<FetchStart> {
        let response = self.post(&Self::fetch_path(connection_id)).await?;
        let status = response.status();

        if status == StatusCode::TOO_MANY_REQUESTS {
            warn!("[BankApi] Fetch start rate limited for {}", connection_id);
            return Ok(FetchStart::RateLimited);
        }
        if !status.is_success() {
            return Ok(FetchStart::Failed(Self::failure_message(response).await));
        }

        debug!("[BankApi] Fetch accepted for {}", connection_id);
        Ok(FetchStart::Accepted)
    }

    async fn get_fetch_status(&self, connection_id: &str) -> Result<FetchStatus> {
        let url = self.url(&Self::fetch_path(connection_id));
        debug!("[BankApi] GET {}", url);

        let response = self.client.get(&url).headers(self.headers()).send().await?;
        if response.status() == StatusCode::TOO_MANY_REQUESTS {
            return Ok(FetchStatus::RateLimited);
        }

        let parsed: ApiFetchStatusResponse = Self::parse_response(response).await?;
        Ok(parsed.status)
    }

    async fn list_accounts(&self) -> Result<Vec<Account>> {
        let response: ApiAccountsResponse = self.get("/api/v1/accounts").await?;
        info!("[BankApi] Fetched {} accounts", response.accounts.len());
        Ok(response.accounts)
    }

    async fn list_recent_transactions(&self, days: u32) -> Result<Vec<Transaction>> {
        let response: ApiTransactionsResponse = self
            .get(&format!("/api/v1/transactions?days={}", days))
            .await?;
        info!(
            "[BankApi] Fetched {} transactions from the last {} days",
            response.transactions.len(),
            days
        );
        Ok(response.transactions)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// ProfileService Trait Implementation
// ─────────────────────────────────────────────────────────────────────────────

#[async_trait]
impl ProfileService for BankApiClient {
    async fn get_profile(&self) -> Result<Profile> {
        self.get("/api/v1/profile").await
    }

    async fn patch_profile(&self, preferences: &PreferenceState) -> Result<Profile> {
        let url = self.url("/api/v1/profile");
        debug!("[BankApi] PATCH {}", url);

        let response = self
            .client
            .patch(&url)
            .headers(self.headers())
            .json(&ApiProfilePatch { preferences })
            .send()
            .await?;
        Self::parse_response(response).await
    }
}
