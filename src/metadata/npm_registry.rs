//! Fetch package metadata and download counts from the npm registry

use crate::config::NetworkConfig;
use crate::error::{AuditError, Result};
use crate::types::{PackageRecord, RegistryMetadata};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

const SERVICE: &str = "npm registry";
const USER_AGENT: &str = concat!(
    env!("CARGO_PKG_NAME"),
    "/",
    env!("CARGO_PKG_VERSION")
);

/// Packument returned by `GET {registry}/{name}`
#[derive(Debug, Deserialize)]
struct RegistryResponse {
    #[serde(rename = "dist-tags", default)]
    dist_tags: HashMap<String, String>,
    /// Version -> publish time, plus `created` and `modified`
    #[serde(default)]
    time: HashMap<String, serde_json::Value>,
    #[serde(default)]
    versions: HashMap<String, serde_json::Value>,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DownloadsResponse {
    #[serde(default)]
    downloads: Vec<DailyDownloads>,
}

#[derive(Debug, Deserialize)]
struct DailyDownloads {
    #[serde(default)]
    downloads: u64,
}

/// Registry client with a cache scoped to the client's lifetime
pub struct RegistryClient {
    client: Client,
    config: NetworkConfig,
    cache: HashMap<(String, String), Option<RegistryMetadata>>,
}

impl RegistryClient {
    pub fn new(config: &NetworkConfig) -> Result<Self> {
        Ok(Self {
            client: build_client(config)?,
            config: config.clone(),
            cache: HashMap::new(),
        })
    }

    /// Metadata for `name` at `version`; `Ok(None)` when the registry does not know it
    pub async fn fetch_package_metadata(
        &mut self,
        name: &str,
        version: &str,
    ) -> Result<Option<RegistryMetadata>> {
        let key = (name.to_string(), version.to_string());
        if let Some(cached) = self.cache.get(&key) {
            return Ok(cached.clone());
        }

        let metadata = fetch_metadata(&self.client, &self.config, name, version).await?;
        self.cache.insert(key, metadata.clone());
        Ok(metadata)
    }

    /// Fetch metadata for every package, keyed by name
    ///
    /// Failed lookups are logged and left out of the map.
    pub async fn fetch_all(
        &mut self,
        packages: &[PackageRecord],
    ) -> HashMap<String, RegistryMetadata> {
        let mut index = HashMap::new();
        let mut tasks = Vec::new();

        for pkg in packages {
            let key = (pkg.name.clone(), pkg.version.clone());
            if let Some(cached) = self.cache.get(&key) {
                if let Some(metadata) = cached {
                    index.insert(pkg.name.clone(), metadata.clone());
                }
                continue;
            }

            let client = self.client.clone();
            let config = self.config.clone();
            let task = tokio::spawn(async move {
                let result = fetch_metadata(&client, &config, &key.0, &key.1).await;
                (key, result)
            });
            tasks.push(task);

            // Spread requests out to stay under registry rate limits
            sleep(self.config.request_delay()).await;
        }

        for task in tasks {
            match task.await {
                Ok((key, Ok(metadata))) => {
                    if let Some(metadata) = &metadata {
                        index.insert(key.0.clone(), metadata.clone());
                    } else {
                        debug!("{} not found in registry", key.0);
                    }
                    self.cache.insert(key, metadata);
                }
                Ok(((name, _), Err(e))) => {
                    warn!("Failed to fetch registry metadata for {}: {}", name, e);
                }
                Err(e) => {
                    warn!("Task failed: {}", e);
                }
            }
        }

        index
    }

    #[cfg(test)]
    fn cache_size(&self) -> usize {
        self.cache.len()
    }
}

async fn fetch_metadata(
    client: &Client,
    config: &NetworkConfig,
    name: &str,
    version: &str,
) -> Result<Option<RegistryMetadata>> {
    debug!("Fetching metadata for {}@{}", name, version);

    let url = format!(
        "{}/{}",
        config.registry_url.trim_end_matches('/'),
        urlencoding::encode(name)
    );
    let response = retry_request(client, &url, config.max_retries, config.request_delay()).await?;

    if response.status() == StatusCode::NOT_FOUND {
        return Ok(None);
    }
    if !response.status().is_success() {
        return Err(AuditError::api(
            SERVICE,
            format!("HTTP {}: {}", response.status(), name),
        ));
    }

    let data: RegistryResponse = response.json().await?;

    // Unpublished ranges fall back to the latest tag
    let target = if data.versions.contains_key(version) {
        version.to_string()
    } else {
        match data.dist_tags.get("latest") {
            Some(latest) if data.versions.contains_key(latest) => {
                debug!("{}@{} not published, using latest {}", name, version, latest);
                latest.clone()
            }
            _ => return Ok(None),
        }
    };

    let last_published = [target.as_str(), "modified", "created"]
        .iter()
        .find_map(|key| data.time.get(*key).and_then(|v| v.as_str()))
        .and_then(parse_datetime);

    let weekly_downloads = fetch_weekly_downloads(client, config, name).await;

    Ok(Some(RegistryMetadata {
        name: name.to_string(),
        version: target,
        last_published,
        weekly_downloads,
        description: data.description,
    }))
}

/// Sum of daily downloads over the last seven days; `None` on any failure
async fn fetch_weekly_downloads(
    client: &Client,
    config: &NetworkConfig,
    name: &str,
) -> Option<u64> {
    let end = Utc::now().date_naive();
    let start = end - ChronoDuration::days(7);
    let url = format!(
        "{}/range/{}:{}/{}",
        config.downloads_url.trim_end_matches('/'),
        start.format("%Y-%m-%d"),
        end.format("%Y-%m-%d"),
        name
    );

    let response = match client.get(&url).send().await {
        Ok(response) if response.status().is_success() => response,
        Ok(response) => {
            debug!("Download stats unavailable for {}: HTTP {}", name, response.status());
            return None;
        }
        Err(e) => {
            debug!("Download stats request failed for {}: {}", name, e);
            return None;
        }
    };

    match response.json::<DownloadsResponse>().await {
        Ok(data) => Some(data.downloads.iter().map(|d| d.downloads).sum()),
        Err(e) => {
            debug!("Invalid download stats for {}: {}", name, e);
            None
        }
    }
}

/// Build HTTP client with proper configuration
fn build_client(config: &NetworkConfig) -> Result<Client> {
    Client::builder()
        .user_agent(USER_AGENT)
        .timeout(config.timeout())
        .build()
        .map_err(|e| AuditError::network(format!("Failed to build HTTP client: {}", e)))
}

/// Retry a request with exponential backoff
async fn retry_request(
    client: &Client,
    url: &str,
    max_retries: u32,
    base_delay: Duration,
) -> Result<reqwest::Response> {
    let mut attempts = 0;
    let mut delay = base_delay;

    loop {
        match client.get(url).send().await {
            Ok(response) => {
                if response.status() == StatusCode::TOO_MANY_REQUESTS {
                    if attempts >= max_retries {
                        return Err(AuditError::RateLimitExceeded {
                            service: SERVICE.to_string(),
                            retry_after: Some(delay),
                        });
                    }
                    warn!("Rate limited by {}, retrying after {:?}", SERVICE, delay);
                    sleep(delay).await;
                    attempts += 1;
                    delay *= 2;
                    continue;
                }
                return Ok(response);
            }
            Err(e) => {
                if attempts >= max_retries {
                    return Err(AuditError::network(format!("Request failed: {}", e)));
                }
                warn!("Request failed, retrying: {}", e);
                sleep(delay).await;
                attempts += 1;
                delay *= 2;
            }
        }
    }
}

fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
}
