//! Periodic self-ping so free-tier hosts don't idle the service out.

use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Spawn a background task that GETs `url` every `every`.
///
/// Failures are logged and otherwise ignored; the task shares nothing with the
/// request path and runs until the runtime shuts down or the handle is aborted.
pub fn spawn(url: String, every: Duration) -> JoinHandle<()> {
    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .build()
        .unwrap_or_else(|_| reqwest::Client::new());

    tokio::spawn(async move {
        // `interval` panics on a zero period.
        let mut ticker = tokio::time::interval(every.max(Duration::from_millis(1)));
        // The first tick fires immediately; the service was just reached by boot.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            ping(&http, &url).await;
        }
    })
}

async fn ping(http: &reqwest::Client, url: &str) {
    match http.get(url).send().await {
        Ok(resp) if resp.status().is_success() => {
            debug!(url, status = %resp.status(), "keep-alive ping ok");
        }
        Ok(resp) => warn!(url, status = %resp.status(), "keep-alive ping returned non-success"),
        Err(e) => warn!(url, error = %e, "keep-alive ping failed"),
    }
}
