//! Derivation of the REST and WebSocket endpoints from the single backend URL.

use url::Url;

use crate::error::{Result, SyncError};

/// Path of the history endpoint.
pub const HISTORY_PATH: &str = "api/messages";

/// Path of the real-time endpoint.
pub const CHANNEL_PATH: &str = "ws";

/// Parse a backend base URL, accepting only `http` and `https`.
pub fn parse_base(base: &str) -> Result<Url> {
    let url = Url::parse(base)?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(SyncError::InvalidUrl(format!(
            "unsupported scheme `{other}` in {base}"
        ))),
    }
}

/// Join a relative path onto the base, keeping any path prefix the base has.
pub fn rest_url(base: &Url, path: &str) -> Result<Url> {
    let mut root = base.clone();
    if !root.path().ends_with('/') {
        let with_slash = format!("{}/", root.path());
        root.set_path(&with_slash);
    }
    Ok(root.join(path.trim_start_matches('/'))?)
}

/// WebSocket URL for the real-time channel (`http` → `ws`, `https` → `wss`).
pub fn channel_url(base: &Url) -> Result<Url> {
    let mut url = rest_url(base, CHANNEL_PATH)?;
    let scheme = if url.scheme() == "https" { "wss" } else { "ws" };
    url.set_scheme(scheme)
        .map_err(|()| SyncError::InvalidUrl(format!("cannot derive {scheme} URL from {base}")))?;
    Ok(url)
}
