use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, bail};
use ferry_upload::{RetryPolicy, UploadOptions};

/// Settings read from `FERRY_*` environment variables.
#[derive(Clone)]
pub struct Config {
    pub endpoint: String,
    pub token: String,
    pub options: UploadOptions,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("endpoint", &self.endpoint)
            .field("token", &"<redacted>")
            .field("options", &self.options)
            .finish()
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let endpoint = get("FERRY_ENDPOINT").unwrap_or_default();
        if endpoint.is_empty() {
            bail!("FERRY_ENDPOINT is not set");
        }
        let token = get("FERRY_TOKEN").unwrap_or_default();
        if token.is_empty() {
            bail!("FERRY_TOKEN is not set");
        }

        let defaults = RetryPolicy::default();
        let retry = RetryPolicy {
            max_retries: parse(&get, "FERRY_MAX_RETRIES")?.unwrap_or(defaults.max_retries),
            base_delay: parse(&get, "FERRY_RETRY_DELAY_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.base_delay),
            max_delay: parse(&get, "FERRY_MAX_RETRY_DELAY_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.max_delay),
            multiplier: parse(&get, "FERRY_BACKOFF_MULTIPLIER")?.unwrap_or(defaults.multiplier),
            ..defaults
        };

        let mut options = UploadOptions::default().with_retry(retry);
        if let Some(size) = parse(&get, "FERRY_CHUNK_SIZE")? {
            options = options.with_chunk_size(size);
        }
        if let Some(secs) = parse(&get, "FERRY_NETWORK_TIMEOUT_SECS")? {
            options = options.with_network_timeout(Duration::from_secs(secs));
        }
        if let Some(mime) = get("FERRY_MIME_TYPE").filter(|m| !m.is_empty()) {
            options = options.with_mime_type(mime);
        }
        options.validate()?;

        Ok(Self {
            endpoint,
            token,
            options,
        })
    }
}

fn parse<T>(get: &impl Fn(&str) -> Option<String>, key: &str) -> anyhow::Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    get(key)
        .filter(|v| !v.trim().is_empty())
        .map(|v| v.trim().parse::<T>().with_context(|| format!("invalid {key}: {v:?}")))
        .transpose()
}
