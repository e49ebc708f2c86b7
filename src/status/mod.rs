//! Liveness probe behind the frontend's API status indicator.
//!
//! Each tick asks the backend for its summary counts. When the backend cannot
//! be reached, the probe falls back to the local mirror document; when that
//! fails too, it reports `error`.

use std::{path::PathBuf, time::Duration};

use anyhow::{Context, Result, bail};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::{
    sync::watch,
    task::JoinHandle,
    time::{self, MissedTickBehavior},
};
use tracing::{debug, info, warn};

use crate::{models::StoreSummary, store};

const MAX_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum StatusReport {
    /// No probe has completed yet.
    Checking,
    Remote {
        #[serde(rename = "userCount")]
        user_count: usize,
        #[serde(rename = "lastUser")]
        last_user: Option<String>,
    },
    Local {
        #[serde(rename = "userCount")]
        user_count: usize,
        #[serde(rename = "lastUser")]
        last_user: Option<String>,
    },
    Error,
}

impl StatusReport {
    pub fn mode(&self) -> &'static str {
        match self {
            StatusReport::Checking => "checking",
            StatusReport::Remote { .. } => "remote",
            StatusReport::Local { .. } => "local",
            StatusReport::Error => "error",
        }
    }

    fn remote(summary: StoreSummary) -> Self {
        StatusReport::Remote {
            user_count: summary.user_count,
            last_user: summary.last_user,
        }
    }

    fn local(summary: StoreSummary) -> Self {
        StatusReport::Local {
            user_count: summary.user_count,
            last_user: summary.last_user,
        }
    }
}

#[derive(Clone)]
pub struct StatusProbe {
    http: Client,
    summary_url: String,
    mirror_path: PathBuf,
    interval: Duration,
}

impl StatusProbe {
    pub fn new(
        summary_url: impl Into<String>,
        mirror_path: impl Into<PathBuf>,
        interval: Duration,
    ) -> Result<Self> {
        // A request never outlives its tick.
        let timeout = interval.min(MAX_REQUEST_TIMEOUT);
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build status HTTP client")?;

        Ok(Self {
            http,
            summary_url: summary_url.into(),
            mirror_path: mirror_path.into(),
            interval,
        })
    }

    /// Run a single probe: remote first, then the local mirror.
    pub async fn probe_once(&self) -> StatusReport {
        match self.fetch_remote().await {
            Ok(summary) => return StatusReport::remote(summary),
            Err(err) => debug!(?err, url = %self.summary_url, "remote status probe failed"),
        }

        match self.read_mirror().await {
            Ok(summary) => StatusReport::local(summary),
            Err(err) => {
                debug!(?err, path = %self.mirror_path.display(), "local mirror unavailable");
                StatusReport::Error
            }
        }
    }

    /// Poll on a fixed interval with at most one probe in flight.
    ///
    /// The loop awaits each probe before waiting for the next tick, and ticks
    /// missed while a slow probe was pending are skipped rather than replayed.
    pub fn spawn(self) -> (watch::Receiver<StatusReport>, JoinHandle<()>) {
        let (tx, rx) = watch::channel(StatusReport::Checking);

        let handle = tokio::spawn(async move {
            let mut ticker = time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                ticker.tick().await;
                let report = self.probe_once().await;

                let previous_mode = tx.borrow().mode();
                if previous_mode != report.mode() {
                    match report {
                        StatusReport::Error => {
                            warn!(from = previous_mode, "API status changed to error")
                        }
                        _ => info!(from = previous_mode, to = report.mode(), "API status changed"),
                    }
                }

                if tx.send(report).is_err() {
                    debug!("status receivers dropped; stopping probe");
                    break;
                }
            }
        });

        (rx, handle)
    }

    async fn fetch_remote(&self) -> Result<StoreSummary> {
        let response = self.http.get(&self.summary_url).send().await?;
        let status = response.status();
        if !status.is_success() {
            bail!("status endpoint answered {status}");
        }

        response
            .json::<StoreSummary>()
            .await
            .context("failed to parse status summary")
    }

    async fn read_mirror(&self) -> Result<StoreSummary> {
        if !tokio::fs::try_exists(&self.mirror_path).await.unwrap_or(false) {
            bail!("local mirror {} does not exist", self.mirror_path.display());
        }

        let document = store::read_document(&self.mirror_path).await?;
        Ok(StoreSummary::from_records(&document.users))
    }
}
