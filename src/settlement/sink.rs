//! Result Sink client.
//!
//! Two wire shapes: a fresh pick (xp is always 0 since the award is only
//! known at settlement time) and a finalized settlement. Plain
//! request/response with no retry contract at this layer: a failed
//! settlement submission simply leaves the posted flag unset and the next
//! tick tries again.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;

use crate::models::Direction;
use crate::outcome::OutcomeSource;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PickSubmission {
    pub user_id: String,
    pub ticker: String,
    pub direction: Direction,
    pub confidence: u8,
    pub challenge_key: String,
    /// Always 0 for a fresh pick.
    pub xp: u32,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SettlementSubmission {
    pub user_id: String,
    pub challenge_key: String,
    pub outcome: Direction,
    pub xp_awarded: u32,
    /// Whether the outcome came from real price movement or the simulated
    /// fallback. Additive; sinks that don't know the field ignore it.
    pub outcome_source: OutcomeSource,
}

#[async_trait]
pub trait ResultSink: Send + Sync {
    async fn submit_pick(&self, submission: &PickSubmission) -> Result<()>;
    async fn submit_settlement(&self, submission: &SettlementSubmission) -> Result<()>;
}

pub struct HttpResultSink {
    client: Client,
    base_url: String,
}

impl HttpResultSink {
    pub fn new(base_url: String) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .context("failed to build HTTP client")?;

        Ok(Self { client, base_url })
    }

    async fn post<T: Serialize + Sync>(&self, path: &str, body: &T) -> Result<()> {
        let url = format!("{}/{}", self.base_url, path);
        self.client
            .post(&url)
            .json(body)
            .send()
            .await
            .with_context(|| format!("{} request failed", path))?
            .error_for_status()
            .with_context(|| format!("{} endpoint returned an error status", path))?;
        Ok(())
    }
}

#[async_trait]
impl ResultSink for HttpResultSink {
    async fn submit_pick(&self, submission: &PickSubmission) -> Result<()> {
        self.post("picks", submission).await
    }

    async fn submit_settlement(&self, submission: &SettlementSubmission) -> Result<()> {
        self.post("settlements", submission).await
    }
}
