//! Online/offline state with change notification.

use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::error::{Error, Result};
use crate::util::is_http_url;

/// Current connectivity, shared by the facade and the sync engine.
///
/// Clones observe the same state. Subscribers see the latest value and are woken
/// on every transition.
#[derive(Clone, Debug)]
pub struct ConnectivityMonitor {
    state: Arc<watch::Sender<bool>>,
}

impl ConnectivityMonitor {
    pub fn new(online: bool) -> Self {
        let (state, _) = watch::channel(online);
        Self {
            state: Arc::new(state),
        }
    }

    pub fn is_online(&self) -> bool {
        *self.state.borrow()
    }

    /// Feed a platform signal. Returns `true` when this was a transition.
    pub fn set_online(&self, online: bool) -> bool {
        let changed = self.state.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        });

        if changed {
            tracing::info!(online, "Connectivity changed");
        }
        changed
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.state.subscribe()
    }
}

impl Default for ConnectivityMonitor {
    fn default() -> Self {
        Self::new(true)
    }
}

/// Polls the remote endpoint and feeds the result into a [`ConnectivityMonitor`].
///
/// Any HTTP response counts as reachable; only transport failures and timeouts
/// report offline.
#[derive(Debug, Clone)]
pub struct ReachabilityProbe {
    url: String,
    interval: Duration,
    client: Client,
}

impl ReachabilityProbe {
    pub fn new(url: impl Into<String>, interval: Duration, timeout: Duration) -> Result<Self> {
        let url = url.into().trim().to_string();
        if !is_http_url(&url) {
            return Err(Error::Config(
                "probe URL must include http:// or https://".to_string(),
            ));
        }

        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| Error::Config(format!("failed to build HTTP client: {error}")))?;

        Ok(Self {
            url,
            interval,
            client,
        })
    }

    /// Single reachability check
    pub async fn check(&self) -> bool {
        match self.client.head(&self.url).send().await {
            Ok(_) => true,
            Err(error) => {
                tracing::debug!("Reachability probe failed: {}", error);
                false
            }
        }
    }

    /// Run the probe until the task is aborted
    pub fn spawn(self, monitor: ConnectivityMonitor) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let online = self.check().await;
                monitor.set_online(online);
            }
        })
    }
}
