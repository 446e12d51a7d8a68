//! Warehouse (source) client
//!
//! Speaks the warehouse's statement API over HTTP: a statement plus
//! positional bindings goes in, a JSON result set comes out. Three
//! authentication variants are supported and exactly one is selected at
//! construction time; the session context (warehouse, database, schema,
//! optional role) rides along with every statement.
//!
//! Extraction never materializes a full result set: `RowStream` pages with a
//! keyset over `(notified_at, notification_id)` so peak row residency is
//! bounded by the batch size and the ordering is total.

pub mod error;
mod stream;

pub use error::WarehouseError;
pub use stream::RowStream;

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::core::config::{Authenticator, WarehouseConfig};
use crate::data::types::Boundary;

/// Interval between SSO token polls (externalbrowser)
const SSO_POLL_INTERVAL_SECS: u64 = 2;

/// Deadline for the interactive SSO round trip
const SSO_DEADLINE_SECS: u64 = 120;

#[derive(Debug, Deserialize)]
struct LoginResponse {
    token: String,
}

#[derive(Debug, Deserialize)]
struct SsoRequestResponse {
    sso_url: String,
    request_id: String,
}

#[derive(Debug, Deserialize)]
struct SsoTokenResponse {
    token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StatementResponse {
    #[serde(default)]
    data: Vec<serde_json::Map<String, Value>>,
}

/// Session credential established at construction
enum SessionAuth {
    /// Session token from a password login
    Session(String),
    /// Bearer token (oauth / SSO)
    Bearer(String),
}

/// Warehouse client service
///
/// Created once at startup and shared; each sync run opens its own
/// `RowStream`, which is owned by exactly one task for its lifetime.
pub struct WarehouseService {
    http: reqwest::Client,
    config: WarehouseConfig,
    auth: SessionAuth,
}

impl WarehouseService {
    /// Connect and authenticate according to the configured variant.
    pub async fn connect(config: WarehouseConfig) -> Result<Self, WarehouseError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.query_timeout_secs))
            .build()
            .map_err(|e| WarehouseError::Connect(e.to_string()))?;

        let auth = match config.authenticator {
            Authenticator::Password => Self::login_password(&http, &config).await?,
            Authenticator::Oauth => {
                let token = config
                    .token
                    .clone()
                    .ok_or_else(|| WarehouseError::Auth("oauth token not configured".into()))?;
                SessionAuth::Bearer(token)
            }
            Authenticator::Externalbrowser => Self::login_browser(&http, &config).await?,
        };

        let service = Self { http, config, auth };
        service.test_connection().await?;

        tracing::debug!(
            url = %service.config.url,
            warehouse = %service.config.warehouse,
            database = %service.config.database,
            schema = %service.config.schema,
            authenticator = %service.config.authenticator,
            "Warehouse connected"
        );
        Ok(service)
    }

    /// Exchange user/password for a session token.
    async fn login_password(
        http: &reqwest::Client,
        config: &WarehouseConfig,
    ) -> Result<SessionAuth, WarehouseError> {
        let password = config
            .password
            .as_ref()
            .ok_or_else(|| WarehouseError::Auth("password not configured".into()))?;

        let response = http
            .post(format!("{}/session/v1/login", config.url))
            .json(&json!({
                "user": config.user,
                "password": password,
                "warehouse": config.warehouse,
                "database": config.database,
                "schema": config.schema,
                "role": config.role,
            }))
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::UNAUTHORIZED
            || response.status() == reqwest::StatusCode::FORBIDDEN
        {
            return Err(WarehouseError::Auth(format!(
                "login rejected for user '{}'",
                config.user
            )));
        }
        let response = response.error_for_status()?;
        let login: LoginResponse = response
            .json()
            .await
            .map_err(|e| WarehouseError::Decode(format!("login response: {}", e)))?;
        Ok(SessionAuth::Session(login.token))
    }

    /// Browser SSO: request a login URL, surface it to the operator and poll
    /// for the issued token until the deadline.
    async fn login_browser(
        http: &reqwest::Client,
        config: &WarehouseConfig,
    ) -> Result<SessionAuth, WarehouseError> {
        let response = http
            .post(format!("{}/session/v1/sso-request", config.url))
            .json(&json!({ "user": config.user }))
            .send()
            .await?
            .error_for_status()?;
        let sso: SsoRequestResponse = response
            .json()
            .await
            .map_err(|e| WarehouseError::Decode(format!("sso request response: {}", e)))?;

        tracing::info!(url = %sso.sso_url, "Complete the warehouse sign-in in your browser");

        let deadline = tokio::time::Instant::now() + Duration::from_secs(SSO_DEADLINE_SECS);
        loop {
            if tokio::time::Instant::now() >= deadline {
                return Err(WarehouseError::Auth(
                    "browser sign-in not completed in time".into(),
                ));
            }
            tokio::time::sleep(Duration::from_secs(SSO_POLL_INTERVAL_SECS)).await;

            let poll = http
                .get(format!(
                    "{}/session/v1/sso-token/{}",
                    config.url, sso.request_id
                ))
                .send()
                .await?
                .error_for_status()?;
            let body: SsoTokenResponse = poll
                .json()
                .await
                .map_err(|e| WarehouseError::Decode(format!("sso token response: {}", e)))?;
            if let Some(token) = body.token {
                return Ok(SessionAuth::Bearer(token));
            }
        }
    }

    fn auth_header(&self) -> (&'static str, String) {
        match &self.auth {
            SessionAuth::Session(token) => ("X-Session-Token", token.clone()),
            SessionAuth::Bearer(token) => ("Authorization", format!("Bearer {}", token)),
        }
    }

    /// Execute a statement with positional `?` bindings, returning the rows
    /// as JSON objects keyed by column name.
    pub(crate) async fn execute(
        &self,
        statement: &str,
        bindings: Vec<Value>,
    ) -> Result<Vec<serde_json::Map<String, Value>>, WarehouseError> {
        let (header, value) = self.auth_header();
        let response = self
            .http
            .post(format!("{}/api/v1/statements", self.config.url))
            .header(header, value)
            .json(&json!({
                "statement": statement,
                "bindings": bindings,
                "warehouse": self.config.warehouse,
                "database": self.config.database,
                "schema": self.config.schema,
                "role": self.config.role,
                "timeout_secs": self.config.query_timeout_secs,
            }))
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(WarehouseError::Auth(format!(
                "statement rejected (HTTP {})",
                status.as_u16()
            )));
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(WarehouseError::Query {
                status: Some(status.as_u16()),
                message,
            });
        }

        let body: StatementResponse = response
            .json()
            .await
            .map_err(|e| WarehouseError::Decode(format!("statement response: {}", e)))?;
        Ok(body.data)
    }

    /// Round-trip probe
    pub async fn test_connection(&self) -> Result<(), WarehouseError> {
        self.execute("SELECT 1", Vec::new()).await.map(|_| ())
    }

    /// Open a keyset-paged stream over `table`, strictly after `since`,
    /// optionally bounded above by `until` (inclusive, backfill ranges).
    pub fn open_stream(
        &self,
        table: &str,
        since: Option<Boundary>,
        until: Option<DateTime<Utc>>,
        batch_size: u32,
    ) -> Result<RowStream<'_>, WarehouseError> {
        validate_identifier(table)?;
        Ok(RowStream::new(self, table.to_string(), since, until, batch_size))
    }

    /// Count rows in `[start, end]` for backfill sizing and ETA.
    pub async fn count_range(
        &self,
        table: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<u64, WarehouseError> {
        validate_identifier(table)?;
        let statement = format!(
            "SELECT COUNT(*) AS n FROM {} WHERE notified_at >= ? AND notified_at <= ?",
            table
        );
        let rows = self
            .execute(
                &statement,
                vec![json!(start.to_rfc3339()), json!(end.to_rfc3339())],
            )
            .await?;
        let count = rows
            .first()
            .and_then(|r| r.get("n").or_else(|| r.get("N")))
            .and_then(|v| v.as_u64().or_else(|| v.as_str().and_then(|s| s.parse().ok())))
            .ok_or_else(|| WarehouseError::Decode("count query returned no rows".into()))?;
        Ok(count)
    }
}

#[cfg(test)]
impl WarehouseService {
    /// Build a service without performing the connect round trip.
    pub(crate) fn new_unconnected_for_tests(config: WarehouseConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
            auth: SessionAuth::Session(String::new()),
        }
    }
}

/// Table and column names are interpolated into statements; only plain
/// identifiers are allowed through.
pub(crate) fn validate_identifier(name: &str) -> Result<(), WarehouseError> {
    let mut chars = name.chars();
    let valid_first = chars
        .next()
        .map(|c| c.is_ascii_alphabetic() || c == '_')
        .unwrap_or(false);
    if valid_first && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        Ok(())
    } else {
        Err(WarehouseError::InvalidIdentifier(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifier_validation() {
        assert!(validate_identifier("notification_text").is_ok());
        assert!(validate_identifier("_tmp2").is_ok());
        assert!(validate_identifier("").is_err());
        assert!(validate_identifier("2fast").is_err());
        assert!(validate_identifier("drop table; --").is_err());
        assert!(validate_identifier("a.b").is_err());
    }
}
