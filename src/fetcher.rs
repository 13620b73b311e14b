use std::future::Future;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Local;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde::Serialize;
use serde_json::Value as JsonValue;
use thiserror::Error;

use crate::{
    config::Settings,
    market::{demo_snapshot, MarketSnapshot},
    state::SharedState,
};

/// Same unreserved set as `encodeURIComponent`.
const URI_COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

/// Why a single route attempt failed. None of these escape `refresh()`.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum FetchError {
    #[error("transport: {0}")]
    Transport(String),
    #[error("http status {0}")]
    Status(u16),
    #[error("body is not json: {0}")]
    Decode(String),
    #[error("payload has no data object")]
    MissingData,
}

/// One way of reaching the ticker endpoint.
///
/// `direct` hits the target as-is. A template containing `{url}` gets the
/// percent-encoded target substituted; any other template is a relay prefix
/// the encoded target is appended to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    template: String,
}

impl Route {
    pub fn new(template: impl Into<String>) -> Self {
        Self { template: template.into() }
    }

    pub fn url_for(&self, target: &str) -> String {
        if self.template.eq_ignore_ascii_case("direct") {
            return target.to_string();
        }
        let encoded = utf8_percent_encode(target, URI_COMPONENT).to_string();
        if self.template.contains("{url}") {
            self.template.replace("{url}", &encoded)
        } else {
            format!("{}{}", self.template, encoded)
        }
    }
}

pub trait Transport: Send + Sync {
    /// GET `url` expecting a JSON body.
    fn get_json(&self, url: &str) -> impl Future<Output = Result<JsonValue, FetchError>> + Send;
}

pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("pricewatch/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("build http client")?;
        Ok(Self { client })
    }
}

impl Transport for HttpTransport {
    async fn get_json(&self, url: &str) -> Result<JsonValue, FetchError> {
        let resp = self
            .client
            .get(url)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| FetchError::Transport(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }

        let body = resp
            .bytes()
            .await
            .map_err(|e| FetchError::Transport(e.to_string()))?;
        serde_json::from_slice(&body).map_err(|e| FetchError::Decode(e.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RefreshOutcome {
    /// Another refresh was already running; nothing was attempted.
    Skipped,
    /// `route` is 1-based.
    Live { route: usize, updated: usize },
    Fallback { updated: usize },
}

pub struct Fetcher<T> {
    transport: T,
    routes: Vec<Route>,
    target: String,
    state: SharedState,
}

impl Fetcher<HttpTransport> {
    pub fn from_settings(settings: &Settings, state: SharedState) -> Result<Self> {
        let transport = HttpTransport::new(Duration::from_secs(settings.route_timeout_secs))?;
        Ok(Self::new(
            transport,
            settings.routes.iter().map(Route::new).collect(),
            settings.ticker_api_url.clone(),
            state,
        ))
    }
}

impl<T: Transport> Fetcher<T> {
    pub fn new(transport: T, routes: Vec<Route>, target: String, state: SharedState) -> Self {
        Self {
            transport,
            routes,
            target,
            state,
        }
    }

    pub fn state(&self) -> &SharedState {
        &self.state
    }

    /// Tries each route in order; the first structurally valid payload wins.
    /// Falls back to the bundled demo dataset when every route fails.
    pub async fn refresh(&self) -> RefreshOutcome {
        let Some(_guard) = self.state.try_begin_fetch() else {
            log::debug!("refresh.skipped reason=in_flight");
            return RefreshOutcome::Skipped;
        };

        for (i, route) in self.routes.iter().enumerate() {
            let n = i + 1;
            let url = route.url_for(&self.target);
            match self.try_route(&url).await {
                Ok(snapshot) => {
                    let updated = self.state.update(|s| {
                        s.using_fallback = false;
                        s.apply_snapshot(&snapshot, Local::now())
                    });
                    log::info!(
                        "refresh.live route={} pairs={} updated={}",
                        n,
                        snapshot.len(),
                        updated
                    );
                    return RefreshOutcome::Live { route: n, updated };
                }
                Err(e) => {
                    log::warn!("refresh.route_failed route={} url={} err={}", n, url, e);
                }
            }
        }

        let updated = self.state.update(|s| {
            s.using_fallback = true;
            s.apply_snapshot(&demo_snapshot(), Local::now())
        });
        log::warn!(
            "refresh.fallback routes_tried={} updated={}",
            self.routes.len(),
            updated
        );
        RefreshOutcome::Fallback { updated }
    }

    async fn try_route(&self, url: &str) -> Result<MarketSnapshot, FetchError> {
        let body = self.transport.get_json(url).await?;
        MarketSnapshot::from_payload(&body).ok_or(FetchError::MissingData)
    }
}
