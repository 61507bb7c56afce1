//! Client for the remote card service.
//!
//! The service has no live contract yet; nothing in the session depends on
//! these calls succeeding.

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use reqwest::{header, Client, RequestBuilder, Response};
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::{config::ApiConfig, models::Card};

/// Body of a remote draw request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DrawRequest {
    /// Number of cards to draw.
    pub count: usize,
}

/// A finished reading as stored by the service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadingRecord {
    /// Card ids in slot order.
    pub cards: Vec<u32>,
    /// Owner of the reading, when logged in.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// When the reading was taken.
    pub timestamp: DateTime<Utc>,
}

impl ReadingRecord {
    /// Build a record for `cards` stamped with the current time.
    pub fn new(cards: &[Card], user_id: Option<&str>) -> Self {
        Self {
            cards: cards.iter().map(|card| card.id).collect(),
            user_id: user_id.map(str::to_string),
            timestamp: Utc::now(),
        }
    }
}

/// HTTP client for the card service.
#[derive(Debug, Clone)]
pub struct CardServiceClient {
    http: Client,
    base_url: String,
    auth_token: Option<String>,
}

impl CardServiceClient {
    /// Build a client from configuration.
    pub fn new(config: &ApiConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            auth_token: config.auth_token.clone(),
        })
    }

    /// Base URL requests are sent to.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Fetch the full catalog.
    pub async fn fetch_all_cards(&self) -> Result<Vec<Card>> {
        let response = self.send(self.get("/cards")).await?;
        response
            .json()
            .await
            .context("failed to decode card list")
    }

    /// Ask the service to draw `count` cards.
    pub async fn draw_cards(&self, count: usize) -> Result<Vec<Card>> {
        let response = self.send(self.draw_request(count)).await?;
        response
            .json()
            .await
            .context("failed to decode drawn cards")
    }

    /// Fetch a single card.
    pub async fn fetch_card(&self, id: u32) -> Result<Card> {
        let response = self.send(self.get(&format!("/tarot/cards/{id}"))).await?;
        response
            .json()
            .await
            .with_context(|| format!("failed to decode card {id}"))
    }

    /// Store a finished reading.
    pub async fn save_reading(&self, cards: &[Card], user_id: Option<&str>) -> Result<()> {
        let record = ReadingRecord::new(cards, user_id);
        self.send(self.reading_request(&record)).await?;
        debug!(cards = ?record.cards, "reading saved");
        Ok(())
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn get(&self, path: &str) -> RequestBuilder {
        self.authorize(self.http.get(self.url(path)))
    }

    fn draw_request(&self, count: usize) -> RequestBuilder {
        self.authorize(self.http.post(self.url("/tarot/draw")))
            .json(&DrawRequest { count })
    }

    fn reading_request(&self, record: &ReadingRecord) -> RequestBuilder {
        self.authorize(self.http.post(self.url("/tarot/readings")))
            .json(record)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        let request = request.header(header::ACCEPT, "application/json");
        match self.auth_token.as_deref() {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response> {
        let response = request.send().await.map_err(|err| {
            if err.is_connect() || err.is_timeout() {
                error!(?err, "card service unreachable");
            } else {
                error!(?err, "card service request failed");
            }
            anyhow!(err)
        })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let url = response.url().to_string();
        match status.as_u16() {
            401 => error!(%url, "unauthorized; login required"),
            403 => error!(%url, "forbidden; insufficient permissions"),
            404 => error!(%url, "resource not found"),
            500 => error!(%url, "server error; try again later"),
            _ => error!(%url, %status, "request failed"),
        }
        Err(anyhow!("card service returned {status} for {url}"))
    }
}
