//! Media-server inventory probe
//!
//! A passive source: the media server lists its live paths as
//! `{items: [{name: "room/id"}]}`. Paths in our room name devices that are
//! publishing even if they never announced themselves on the channel.

use std::time::Duration;

use serde::Deserialize;

use crate::error::{Error, Result};

/// One listed path
#[derive(Debug, Clone, Deserialize)]
pub struct InventoryItem {
    pub name: String,
    #[serde(default)]
    pub ready: Option<bool>,
}

/// Path listing returned by the inventory endpoint
#[derive(Debug, Clone, Default, Deserialize)]
pub struct InventoryListing {
    #[serde(default)]
    pub items: Vec<InventoryItem>,
}

impl InventoryListing {
    /// Device ids listed under `room/`, first occurrence order
    pub fn ids_for_room(&self, room: &str) -> Vec<String> {
        let mut ids: Vec<String> = Vec::new();

        for item in &self.items {
            let mut parts = item.name.trim_matches('/').split('/');
            let (Some(prefix), Some(id), None) = (parts.next(), parts.next(), parts.next()) else {
                continue;
            };
            if prefix == room && !id.is_empty() && !ids.iter().any(|known| known == id) {
                ids.push(id.to_string());
            }
        }

        ids
    }
}

/// HTTP client for the inventory listing
pub struct InventoryClient {
    http: reqwest::Client,
    url: reqwest::Url,
}

impl InventoryClient {
    pub fn new(url: &str, timeout: Duration) -> Result<Self> {
        let url = reqwest::Url::parse(url).map_err(|e| Error::Inventory(e.to_string()))?;
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Inventory(e.to_string()))?;

        Ok(Self { http, url })
    }

    pub fn url(&self) -> &reqwest::Url {
        &self.url
    }

    /// Fetch the current listing
    pub async fn fetch(&self) -> Result<InventoryListing> {
        let response = self
            .http
            .get(self.url.clone())
            .send()
            .await
            .map_err(|e| Error::Inventory(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Inventory(format!("listing returned {}", status)));
        }

        let listing: InventoryListing = response
            .json()
            .await
            .map_err(|e| Error::Inventory(e.to_string()))?;

        tracing::debug!(url = %self.url, items = listing.items.len(), "Inventory fetched");
        Ok(listing)
    }
}
