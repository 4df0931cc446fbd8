use std::path::PathBuf;
use std::time::Duration;

use harvest_core::AppError;
use harvest_core::fetch_client::DEFAULT_URL_TEMPLATE;

pub const DEFAULT_CONCURRENCY: usize = 5;
pub const MAX_CONCURRENCY: usize = 20;
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_PROXY_FILE: &str = "proxies.json";

/// Runtime settings for the CLI.
#[derive(Debug, Clone, PartialEq)]
pub struct HarvestConfig {
    pub url_template: String,
    pub concurrency: usize,
    pub timeout: Duration,
    pub proxy_file: PathBuf,
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            url_template: DEFAULT_URL_TEMPLATE.to_string(),
            concurrency: DEFAULT_CONCURRENCY,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            proxy_file: PathBuf::from(DEFAULT_PROXY_FILE),
        }
    }
}

impl HarvestConfig {
    /// Read configuration from environment variables.
    ///
    /// - `HARVEST_URL_TEMPLATE` (optional, must contain `{id}`)
    /// - `HARVEST_CONCURRENCY` (optional, 1..=20, defaults to 5)
    /// - `HARVEST_TIMEOUT_SECS` (optional, defaults to 30)
    /// - `HARVEST_PROXY_FILE` (optional, defaults to `proxies.json`)
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, AppError> {
        let defaults = Self::default();

        let url_template = match lookup("HARVEST_URL_TEMPLATE") {
            None => defaults.url_template,
            Some(raw) => {
                validate_url_template(&raw)?;
                raw
            }
        };

        let concurrency = match lookup("HARVEST_CONCURRENCY") {
            None => defaults.concurrency,
            Some(raw) => {
                let parsed: usize = raw.trim().parse().map_err(|_| {
                    AppError::ConfigError(format!(
                        "Invalid HARVEST_CONCURRENCY '{raw}': must be a positive integer"
                    ))
                })?;
                validate_concurrency(parsed)?
            }
        };

        let timeout = match lookup("HARVEST_TIMEOUT_SECS") {
            None => defaults.timeout,
            Some(raw) => {
                let secs: u64 = raw.trim().parse().map_err(|_| {
                    AppError::ConfigError(format!(
                        "Invalid HARVEST_TIMEOUT_SECS '{raw}': must be a positive integer"
                    ))
                })?;
                if secs == 0 {
                    return Err(AppError::ConfigError(
                        "HARVEST_TIMEOUT_SECS must be at least 1".into(),
                    ));
                }
                Duration::from_secs(secs)
            }
        };

        let proxy_file = lookup("HARVEST_PROXY_FILE")
            .map(PathBuf::from)
            .unwrap_or(defaults.proxy_file);

        Ok(Self {
            url_template,
            concurrency,
            timeout,
            proxy_file,
        })
    }
}

pub fn validate_concurrency(concurrency: usize) -> Result<usize, AppError> {
    if !(1..=MAX_CONCURRENCY).contains(&concurrency) {
        return Err(AppError::ConfigError(format!(
            "concurrency must be between 1 and {MAX_CONCURRENCY}, got {concurrency}"
        )));
    }
    Ok(concurrency)
}

fn validate_url_template(template: &str) -> Result<(), AppError> {
    if !template.contains("{id}") {
        return Err(AppError::ConfigError(format!(
            "HARVEST_URL_TEMPLATE '{template}' has no {{id}} placeholder"
        )));
    }
    url::Url::parse(&template.replace("{id}", "0")).map_err(|e| {
        AppError::ConfigError(format!("HARVEST_URL_TEMPLATE is not a valid URL: {e}"))
    })?;
    Ok(())
}
