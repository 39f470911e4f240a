use std::time::Duration;

use anyhow::{bail, Context, Result};
use reqwest::Client;

use crate::{
    config::RemoteCredentials,
    events::{BlessingRecord, NewBlessing},
    protocol::BLESSINGS_TABLE,
};

const USER_AGENT: &str = concat!("blessing-countdown/", env!("CARGO_PKG_VERSION"));

/// PostgREST access to the blessings table.
#[derive(Debug, Clone)]
pub struct SupabaseClient {
    credentials: RemoteCredentials,
    http: Client,
}

impl SupabaseClient {
    pub fn new(credentials: RemoteCredentials) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(10))
            .user_agent(USER_AGENT)
            .build()
            .context("failed building http client")?;
        Ok(Self { credentials, http })
    }

    pub fn credentials(&self) -> &RemoteCredentials {
        &self.credentials
    }

    /// Newest-first rows for `room`, at most `limit`.
    pub async fn fetch_recent(&self, room: &str, limit: usize) -> Result<Vec<BlessingRecord>> {
        let url = self.table_url();
        let room_filter = format!("eq.{room}");
        let limit = limit.to_string();
        let response = self
            .http
            .get(&url)
            .query(&[
                ("select", "id,room_id,name,text,created_at"),
                ("room_id", room_filter.as_str()),
                ("order", "created_at.desc"),
                ("limit", limit.as_str()),
            ])
            .header("apikey", &self.credentials.anon_key)
            .bearer_auth(&self.credentials.anon_key)
            .send()
            .await
            .with_context(|| format!("blessing query to {url} failed"))?;
        if !response.status().is_success() {
            bail!("blessing query returned {}", response.status());
        }
        response
            .json::<Vec<BlessingRecord>>()
            .await
            .context("invalid blessing rows payload")
    }

    pub async fn insert(&self, blessing: &NewBlessing) -> Result<()> {
        let url = self.table_url();
        let response = self
            .http
            .post(&url)
            .header("apikey", &self.credentials.anon_key)
            .header("Prefer", "return=minimal")
            .bearer_auth(&self.credentials.anon_key)
            .json(blessing)
            .send()
            .await
            .with_context(|| format!("blessing insert to {url} failed"))?;
        if !response.status().is_success() {
            bail!("blessing insert returned {}", response.status());
        }
        Ok(())
    }

    /// Websocket endpoint for Realtime channels.
    pub fn realtime_url(&self) -> String {
        let base = self.credentials.url.trim_end_matches('/');
        let ws_base = if let Some(rest) = base.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = base.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            base.to_owned()
        };
        format!(
            "{ws_base}/realtime/v1/websocket?apikey={}&vsn=1.0.0",
            self.credentials.anon_key
        )
    }

    fn table_url(&self) -> String {
        format!(
            "{}/rest/v1/{BLESSINGS_TABLE}",
            self.credentials.url.trim_end_matches('/')
        )
    }
}
