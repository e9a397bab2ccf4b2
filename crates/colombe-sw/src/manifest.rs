//! Release manifest retrieval.

use colombe_common::{ColombeError, Result};
use serde::{Deserialize, Deserializer, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};
use url::Url;

use crate::net::{no_cache, Network, Request};

/// The release descriptor published next to the application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    pub current_version: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub changelog: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub mandatory: bool,
    #[serde(default)]
    pub release_date: Option<String>,
}

fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

impl Manifest {
    /// Parse a manifest body.
    pub fn parse(body: &[u8]) -> Result<Self> {
        let manifest: Manifest =
            serde_json::from_slice(body).map_err(|e| ColombeError::manifest(e.to_string()))?;
        if manifest.current_version.trim().is_empty() {
            return Err(ColombeError::manifest("currentVersion is empty"));
        }
        Ok(manifest)
    }
}

/// Fetches the manifest, never from a cache.
pub struct ManifestFetcher {
    network: Arc<dyn Network>,
    url: Url,
}

impl ManifestFetcher {
    pub fn new(network: Arc<dyn Network>, url: Url) -> Self {
        Self { network, url }
    }

    /// The manifest URL without the cache-busting parameter.
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Fetch and parse the manifest.
    ///
    /// Each request carries a unique `t` query parameter and a
    /// `Cache-Control: no-cache` header.
    pub async fn fetch(&self) -> Result<Manifest> {
        let mut url = self.url.clone();
        url.query_pairs_mut()
            .append_pair("t", &chrono::Utc::now().timestamp_millis().to_string());

        let (name, value) = no_cache();
        let request = Request::get(url).header(name, value);

        let response = self.network.fetch(&request).await?;
        if !response.ok() {
            warn!(url = %self.url, status = %response.status, "Manifest not available");
            return Err(ColombeError::network(format!(
                "manifest answered {}",
                response.status
            )));
        }

        let manifest = Manifest::parse(&response.body)?;
        debug!(
            version = %manifest.current_version,
            mandatory = manifest.mandatory,
            "Manifest fetched"
        );
        Ok(manifest)
    }
}
