use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::config::Config;
use crate::model::{Cashback, Partnership, Platform, Store};

pub mod model;

pub use model::{ResultSet, Row, Statement, Value};
use model::{PipelineRequest, PipelineResponse, StreamRequest, StreamResponse, StreamResult};

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("remote request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("remote returned HTTP {status}: {body}")]
    Status { status: StatusCode, body: String },
    #[error("remote statement failed: {message}")]
    Statement {
        message: String,
        code: Option<String>,
    },
    #[error("unexpected remote response: {0}")]
    Protocol(String),
}

/// The authoritative catalog. Every call is independent; implementations keep
/// no per-sync state.
#[async_trait]
pub trait RemoteSource: Send + Sync {
    /// Raw `MAX(updated_at)` of the change-tracking table, `None` when empty.
    async fn latest_update(&self) -> Result<Option<String>>;

    async fn fetch_stores(&self) -> Result<Vec<Store>>;

    async fn fetch_platforms(&self) -> Result<Vec<Platform>>;

    async fn fetch_partnerships(&self) -> Result<Vec<Partnership>>;

    /// Cashbacks with `id > after_id`, ascending.
    async fn fetch_cashbacks_after(&self, after_id: i64) -> Result<Vec<Cashback>>;
}

/// libSQL/Turso client speaking the HTTP pipeline protocol.
#[derive(Clone)]
pub struct TursoClient {
    http: Client,
    pipeline_url: Url,
    auth_token: String,
}

impl fmt::Debug for TursoClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TursoClient")
            .field("pipeline_url", &self.pipeline_url)
            .field("auth_token", &"[REDACTED]")
            .finish()
    }
}

impl TursoClient {
    pub fn new(database_url: &str, auth_token: String, timeout: Duration) -> Result<Self> {
        let base = http_base_url(database_url)?;
        let pipeline_url = base
            .join("v2/pipeline")
            .context("invalid remote database URL")?;
        let http = Client::builder()
            .user_agent("cashback-mirror/0.1")
            .timeout(timeout)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            http,
            pipeline_url,
            auth_token,
        })
    }

    pub fn from_config(cfg: &Config) -> Result<Self> {
        Self::new(
            &cfg.remote.url,
            cfg.remote.auth_token.clone(),
            cfg.remote_timeout(),
        )
    }

    pub fn build_request(&self, stmt: Statement) -> Result<reqwest::Request, RemoteError> {
        let body = PipelineRequest {
            baton: None,
            requests: vec![StreamRequest::Execute { stmt }, StreamRequest::Close],
        };
        let request = self
            .http
            .post(self.pipeline_url.clone())
            .bearer_auth(&self.auth_token)
            .json(&body)
            .build()?;
        Ok(request)
    }

    /// Run one statement in a fresh stream and return its rows.
    pub async fn execute(&self, stmt: Statement) -> Result<ResultSet, RemoteError> {
        debug!(sql = %stmt.sql, "remote execute");
        let request = self.build_request(stmt)?;
        let res = self.http.execute(request).await?;

        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(RemoteError::Status {
                status,
                body: compact_body(&body),
            });
        }

        let payload: PipelineResponse = res.json().await?;
        first_result(payload)
    }
}

fn first_result(payload: PipelineResponse) -> Result<ResultSet, RemoteError> {
    match payload.results.into_iter().next() {
        Some(StreamResult::Ok {
            response: StreamResponse::Execute { result },
        }) => Ok(result),
        Some(StreamResult::Error { error }) => Err(RemoteError::Statement {
            message: error.message,
            code: error.code,
        }),
        Some(other) => Err(RemoteError::Protocol(format!(
            "expected execute result, got {other:?}"
        ))),
        None => Err(RemoteError::Protocol("empty pipeline response".into())),
    }
}

/// `libsql://host` is served over HTTPS; a trailing slash makes `join` append.
fn http_base_url(database_url: &str) -> Result<Url> {
    let trimmed = database_url.trim();
    let rewritten = match trimmed.strip_prefix("libsql://") {
        Some(rest) => format!("https://{rest}"),
        None => trimmed.to_string(),
    };
    let with_slash = if rewritten.ends_with('/') {
        rewritten
    } else {
        format!("{rewritten}/")
    };
    Url::parse(&with_slash).with_context(|| format!("invalid remote database URL {trimmed}"))
}

fn compact_body(body: &str) -> String {
    body.trim().chars().take(180).collect()
}

#[async_trait]
impl RemoteSource for TursoClient {
    async fn latest_update(&self) -> Result<Option<String>> {
        let rs = self
            .execute(Statement::new("SELECT MAX(updated_at) FROM table_updates"))
            .await?;
        Ok(rs
            .scalar()
            .and_then(Value::as_text)
            .filter(|s| !s.trim().is_empty()))
    }

    async fn fetch_stores(&self) -> Result<Vec<Store>> {
        let rs = self
            .execute(Statement::new("SELECT id, name, url FROM stores"))
            .await?;
        let stores = rs.map_rows(|row| {
            Ok(Store {
                id: row.i64("id")?,
                name: row.text("name")?,
                url: row.opt_text("url")?,
            })
        })?;
        Ok(stores)
    }

    async fn fetch_platforms(&self) -> Result<Vec<Platform>> {
        let rs = self
            .execute(Statement::new("SELECT id, name, url FROM platforms"))
            .await?;
        let platforms = rs.map_rows(|row| {
            Ok(Platform {
                id: row.i64("id")?,
                name: row.text("name")?,
                url: row.opt_text("url")?,
            })
        })?;
        Ok(platforms)
    }

    async fn fetch_partnerships(&self) -> Result<Vec<Partnership>> {
        let rs = self
            .execute(Statement::new(
                "SELECT id, store_id, platform_id, url FROM partnerships",
            ))
            .await?;
        let partnerships = rs.map_rows(|row| {
            Ok(Partnership {
                id: row.i64("id")?,
                store_id: row.i64("store_id")?,
                platform_id: row.i64("platform_id")?,
                url: row.opt_text("url")?,
            })
        })?;
        Ok(partnerships)
    }

    async fn fetch_cashbacks_after(&self, after_id: i64) -> Result<Vec<Cashback>> {
        let stmt = Statement::new(
            "SELECT id, partnership_id, value_global, value_specific, description, date_start, date_end \
             FROM cashbacks WHERE id > ? ORDER BY id",
        )
        .bind(Value::integer(after_id));
        let rs = self.execute(stmt).await?;
        let cashbacks = rs.map_rows(|row| {
            Ok(Cashback {
                id: row.i64("id")?,
                partnership_id: row.i64("partnership_id")?,
                value_global: row.f64("value_global")?,
                value_specific: row.opt_f64("value_specific")?,
                description: row.opt_text("description")?,
                date_start: row.text("date_start")?,
                date_end: row.opt_text("date_end")?,
            })
        })?;
        Ok(cashbacks)
    }
}
