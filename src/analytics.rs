use serde::Serialize;
use tokio::runtime::Handle;
use tracing::{debug, warn};

use crate::error::Result;

/// Best-effort usage tracking. Callers discard failures after logging them.
pub trait Tracker {
    fn track_marker_click(&self, location: &str) -> Result<()>;
}

/// Records clicks in the log only.
#[derive(Debug, Default)]
pub struct LogTracker;

impl Tracker for LogTracker {
    fn track_marker_click(&self, location: &str) -> Result<()> {
        debug!(location, "marker click");
        Ok(())
    }
}

#[derive(Serialize)]
struct ClickEvent<'a> {
    event: &'static str,
    location: &'a str,
}

/// Posts click events to a collector endpoint in the background.
pub struct HttpTracker {
    http: reqwest::Client,
    url: String,
    runtime: Handle,
}

impl HttpTracker {
    pub fn new(http: reqwest::Client, url: impl Into<String>, runtime: Handle) -> Self {
        Self { http, url: url.into(), runtime }
    }
}

impl Tracker for HttpTracker {
    fn track_marker_click(&self, location: &str) -> Result<()> {
        let request = self
            .http
            .post(&self.url)
            .json(&ClickEvent { event: "marker_click", location })
            .build()?;
        let http = self.http.clone();
        self.runtime.spawn(async move {
            match http.execute(request).await {
                Ok(resp) if resp.status().is_success() => {}
                Ok(resp) => warn!(status = resp.status().as_u16(), "tracking rejected"),
                Err(err) => warn!(%err, "tracking failed"),
            }
        });
        Ok(())
    }
}

/// Fires a click event, logging and discarding any failure.
pub fn record_click(tracker: &dyn Tracker, location: &str) {
    if let Err(err) = tracker.track_marker_click(location) {
        debug!(%err, "tracking skipped");
    }
}
