//! Served-application configuration: fetch, parse, version gate.
//!
//! The remote app exposes its configuration either at a dedicated
//! `/config` endpoint or embedded in its root HTML behind a fixed
//! delimiter. Both paths produce the same [`AppConfig`], which is parsed
//! once at client construction and read-only thereafter.
//!
//! A config whose major version predates the queue protocol is rejected
//! outright rather than silently misinterpreted.

use serde::Deserialize;

use crate::error::{ClientError, Result};

/// Delimiter preceding the embedded JSON config in the served HTML.
pub const HTML_CONFIG_DELIMITER: &str = "window.app_config =";

/// Oldest config major version this client understands.
pub const MIN_SUPPORTED_MAJOR: u32 = 3;

/// One invokable function declared by the server.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Dependency {
    /// Ordered input component ids.
    #[serde(default)]
    pub inputs: Vec<u32>,
    /// Ordered output component ids.
    #[serde(default)]
    pub outputs: Vec<u32>,
    /// Optional stable name for resolution by callers.
    #[serde(default)]
    pub api_name: Option<String>,
    /// Whether the dependency maps to a server-side function at all.
    #[serde(default)]
    pub backend_fn: bool,
    /// Per-dependency queue override; `None` falls back to the app flag.
    #[serde(default)]
    pub queue: Option<bool>,
}

/// A typed data element with an associated serializer.
#[derive(Debug, Clone, Deserialize)]
pub struct Component {
    pub id: u32,
    #[serde(rename = "type")]
    pub component_type: String,
    /// Explicit serializer name; overrides type-tag lookup when present.
    #[serde(default)]
    pub serializer: Option<String>,
}

/// Parsed application configuration.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub enable_queue: bool,
    #[serde(default)]
    pub dependencies: Vec<Dependency>,
    #[serde(default)]
    pub components: Vec<Component>,
}

impl AppConfig {
    /// Parse config JSON and reject unsupported legacy versions.
    pub fn parse(raw: &str) -> Result<AppConfig> {
        let config: AppConfig = serde_json::from_str(raw)
            .map_err(|e| ClientError::ConfigFetch(format!("invalid config JSON: {e}")))?;
        config.check_version()?;
        Ok(config)
    }

    /// Major component of the protocol version, 0 when absent/unparsable.
    pub fn major_version(&self) -> u32 {
        self.version
            .split('.')
            .next()
            .and_then(|s| s.trim().parse().ok())
            .unwrap_or(0)
    }

    fn check_version(&self) -> Result<()> {
        if self.major_version() < MIN_SUPPORTED_MAJOR {
            return Err(ClientError::ConfigFetch(format!(
                "unsupported legacy app version {:?} (minimum major {})",
                self.version, MIN_SUPPORTED_MAJOR
            )));
        }
        Ok(())
    }

    /// Look up a component by id.
    pub fn component(&self, id: u32) -> Option<&Component> {
        self.components.iter().find(|c| c.id == id)
    }
}

/// Extract the embedded JSON config from served HTML.
///
/// The config object sits between [`HTML_CONFIG_DELIMITER`] and the closing
/// `</script>` of the same block, optionally terminated by a semicolon.
pub fn extract_html_config(html: &str) -> Result<String> {
    let start = html
        .find(HTML_CONFIG_DELIMITER)
        .ok_or_else(|| ClientError::ConfigFetch("config delimiter not found in HTML".into()))?;
    let rest = &html[start + HTML_CONFIG_DELIMITER.len()..];
    let end = rest
        .find("</script>")
        .ok_or_else(|| ClientError::ConfigFetch("unterminated config script block".into()))?;
    let raw = rest[..end].trim().trim_end_matches(';').trim();
    if raw.is_empty() {
        return Err(ClientError::ConfigFetch("empty embedded config".into()));
    }
    Ok(raw.to_string())
}

/// Fetch and parse the application config.
///
/// Tries `{root}/config` first, then falls back to extracting the config
/// embedded in the root HTML.
pub async fn fetch_config(http: &reqwest::Client, root_url: &str) -> Result<AppConfig> {
    let config_url = format!("{}/config", root_url.trim_end_matches('/'));
    match http.get(&config_url).send().await {
        Ok(resp) if resp.status().is_success() => {
            let body = resp.text().await?;
            if let Ok(config) = AppConfig::parse(&body) {
                return Ok(config);
            }
            tracing::debug!(url = %config_url, "config endpoint returned non-config body");
        }
        Ok(resp) => {
            tracing::debug!(status = %resp.status(), "config endpoint unavailable");
        }
        Err(e) => {
            return Err(ClientError::ConfigFetch(format!(
                "request to {config_url} failed: {e}"
            )));
        }
    }

    let resp = http
        .get(root_url)
        .send()
        .await
        .map_err(|e| ClientError::ConfigFetch(format!("request to {root_url} failed: {e}")))?;
    let html = resp
        .text()
        .await
        .map_err(|e| ClientError::ConfigFetch(format!("reading {root_url} failed: {e}")))?;
    AppConfig::parse(&extract_html_config(&html)?)
}
