//! Persistent proxy list.
//!
//! Stored as `{ "updatedAt", "proxies", "currentIndex" }`. The plain-text
//! format of older installs (one proxy per line) is still accepted on load.

use std::net::Ipv4Addr;
use std::path::Path;

use chrono::{DateTime, Utc};
use harvest_core::{AppError, ProxyPool};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyFile {
    pub updated_at: DateTime<Utc>,
    pub proxies: Vec<String>,
    #[serde(default)]
    pub current_index: usize,
}

impl ProxyFile {
    pub fn new(proxies: Vec<String>, current_index: usize) -> Self {
        Self {
            updated_at: Utc::now(),
            proxies,
            current_index,
        }
    }

    /// Snapshot of a pool's list and position.
    pub fn from_pool(pool: &ProxyPool) -> Self {
        Self::new(pool.addresses(), pool.current_index())
    }

    /// Load `path`. A missing file is `Ok(None)`.
    pub fn load(path: &Path) -> Result<Option<Self>, AppError> {
        if !path.exists() {
            return Ok(None);
        }
        let text = std::fs::read_to_string(path)?;
        Self::parse(&text).map(Some)
    }

    /// Parse either the JSON document or the legacy line format.
    pub fn parse(text: &str) -> Result<Self, AppError> {
        if text.trim_start().starts_with('{') {
            return Ok(serde_json::from_str(text)?);
        }
        Ok(Self::new(parse_legacy(text), 0))
    }

    pub fn save(&self, path: &Path) -> Result<(), AppError> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        tracing::debug!(path = %path.display(), count = self.proxies.len(), "Proxy file saved");
        Ok(())
    }

    /// Replace the pool's proxies with this file's list and restore its position.
    pub fn apply_to(&self, pool: &ProxyPool) -> Result<(), AppError> {
        pool.set_proxies(self.proxies.iter().cloned())?;
        pool.set_current_index(self.current_index);
        Ok(())
    }

    /// Drop the entries at `indexes`; out-of-range indexes are ignored.
    ///
    /// The current index is reset if it no longer points inside the list.
    pub fn remove(&mut self, indexes: &[usize]) -> usize {
        let before = self.proxies.len();
        let mut position = 0;
        self.proxies.retain(|_| {
            let keep = !indexes.contains(&position);
            position += 1;
            keep
        });
        if self.current_index >= self.proxies.len() {
            self.current_index = 0;
        }
        self.updated_at = Utc::now();
        before - self.proxies.len()
    }
}

/// Parse the legacy text list.
///
/// Blank lines and `//` comments are skipped. Accepted lines:
/// - a full proxy URI (`socks5://...`, `http://...`)
/// - `ip:port`, taken as an HTTP proxy
/// - `ip login: user password: pass SOCKS5: port HTTP/S: port`, yielding one
///   entry per port given
pub fn parse_legacy(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with("//"))
        .flat_map(parse_legacy_line)
        .collect()
}

fn parse_legacy_line(line: &str) -> Vec<String> {
    if line.contains("://") {
        return vec![line.to_string()];
    }

    let tokens: Vec<&str> = line.split_whitespace().collect();

    if let Some((ip, port)) = tokens.iter().find_map(|t| ip_port(t)) {
        return vec![format!("http://{ip}:{port}")];
    }

    let Some(ip) = tokens.iter().find_map(|t| t.parse::<Ipv4Addr>().ok()) else {
        return Vec::new();
    };

    let labelled = |labels: &[&str]| {
        tokens.windows(2).find_map(|pair| {
            let label = pair[0].to_ascii_lowercase();
            labels.contains(&label.as_str()).then(|| pair[1])
        })
    };
    let login = labelled(&["login:"]);
    let password = labelled(&["password:"]);
    let credentials = match (login, password) {
        (Some(user), Some(pass)) => format!("{user}:{pass}@"),
        _ => String::new(),
    };

    let mut proxies = Vec::new();
    if let Some(port) = labelled(&["socks5:"]).filter(|p| p.parse::<u16>().is_ok()) {
        proxies.push(format!("socks5://{credentials}{ip}:{port}"));
    }
    if let Some(port) =
        labelled(&["http:", "https:", "http/s:"]).filter(|p| p.parse::<u16>().is_ok())
    {
        proxies.push(format!("http://{credentials}{ip}:{port}"));
    }
    proxies
}

fn ip_port(token: &str) -> Option<(Ipv4Addr, u16)> {
    let (ip, port) = token.split_once(':')?;
    Some((ip.parse().ok()?, port.parse().ok()?))
}
