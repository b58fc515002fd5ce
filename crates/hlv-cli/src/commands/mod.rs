pub mod cancel;
pub mod create;
pub mod get;
pub mod history;
pub mod list;
pub mod rebalance;
pub mod status;

use serde::de::DeserializeOwned;
use serde::Deserialize;

pub const DEFAULT_ENDPOINT: &str = "http://127.0.0.1:9101";

#[derive(Deserialize)]
struct ErrorResponse {
    error: String,
    class: String,
}

/// Decode a successful response body, or turn the node's error body into
/// an `anyhow` error prefixed with `action`.
pub async fn decode<T: DeserializeOwned>(
    resp: reqwest::Result<reqwest::Response>,
    endpoint: &str,
    action: &str,
) -> anyhow::Result<T> {
    let resp = match resp {
        Ok(r) => r,
        Err(e) => {
            println!("Could not reach node at {}", endpoint);
            println!("  Error: {}", e);
            println!();
            println!("Start a node with 'hlv-node' first.");
            anyhow::bail!("{} failed: node unreachable", action);
        }
    };

    let status = resp.status();
    if status.is_success() {
        return Ok(resp.json().await?);
    }
    match resp.json::<ErrorResponse>().await {
        Ok(err) => anyhow::bail!("{} failed (HTTP {}, {}): {}", action, status, err.class, err.error),
        Err(_) => anyhow::bail!("{} failed (HTTP {})", action, status),
    }
}
