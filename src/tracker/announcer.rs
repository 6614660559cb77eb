use std::time::{Duration, Instant};

use tracing::{debug, warn};

use super::backoff::Backoff;
use super::error::TrackerError;
use super::http::HttpTracker;
use super::response::{AnnounceRequest, AnnounceResponse};
use super::udp::UdpTracker;

/// A tracker of either transport, chosen by URL scheme.
pub enum Tracker {
    Http(HttpTracker),
    Udp(UdpTracker),
}

impl Tracker {
    pub fn from_url(url: &str, timeout: Duration) -> Result<Self, TrackerError> {
        let scheme = url
            .split_once("://")
            .map(|(scheme, _)| scheme)
            .ok_or_else(|| TrackerError::InvalidUrl(url.to_string()))?;

        match scheme {
            "http" | "https" => Ok(Tracker::Http(HttpTracker::with_timeout(url, timeout)?)),
            "udp" => Ok(Tracker::Udp(UdpTracker::new(url)?)),
            other => Err(TrackerError::UnsupportedProtocol(other.to_string())),
        }
    }

    pub async fn announce(
        &mut self,
        request: &AnnounceRequest,
    ) -> Result<AnnounceResponse, TrackerError> {
        match self {
            Tracker::Http(tracker) => tracker.announce(request).await,
            Tracker::Udp(tracker) => tracker.announce(request).await,
        }
    }

    pub fn url(&self) -> &str {
        match self {
            Tracker::Http(tracker) => tracker.url(),
            Tracker::Udp(tracker) => tracker.url(),
        }
    }
}

struct Slot {
    tracker: Tracker,
    backoff: Backoff,
}

/// Announces to a torrent's trackers, failing over between them.
///
/// Trackers are tried in metainfo order. Each keeps its own [`Backoff`]; a
/// tracker that fails is skipped until its retry time and dropped for good
/// once its attempts run out.
pub struct Announcer {
    slots: Vec<Slot>,
    last_success: Option<usize>,
}

impl Announcer {
    /// URLs that cannot be parsed or use an unknown scheme are skipped.
    pub fn new(urls: &[String], backoff: Backoff, timeout: Duration) -> Self {
        let slots = urls
            .iter()
            .filter_map(|url| match Tracker::from_url(url, timeout) {
                Ok(tracker) => Some(Slot {
                    tracker,
                    backoff: backoff.clone(),
                }),
                Err(e) => {
                    warn!(tracker = %url, error = %e, "skipping tracker");
                    None
                }
            })
            .collect();

        Self {
            slots,
            last_success: None,
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// True once no tracker has attempts left.
    pub fn is_exhausted(&self) -> bool {
        self.slots.iter().all(|slot| slot.backoff.is_exhausted())
    }

    /// Earliest time any tracker may be tried again, or `None` if all are
    /// exhausted.
    pub fn next_attempt_at(&self, now: Instant) -> Option<Instant> {
        self.slots
            .iter()
            .filter(|slot| !slot.backoff.is_exhausted())
            .map(|slot| slot.backoff.next_retry_at().unwrap_or(now))
            .min()
    }

    /// Announces to the first tracker that is ready at `now` and succeeds.
    ///
    /// # Errors
    ///
    /// - [`TrackerError::Exhausted`] once every tracker has used its attempts
    /// - the last tracker's error if every ready tracker failed
    /// - [`TrackerError::BackingOff`] if no tracker was ready
    pub async fn announce(
        &mut self,
        request: &AnnounceRequest,
        now: Instant,
    ) -> Result<AnnounceResponse, TrackerError> {
        let mut last_error = None;

        for (index, slot) in self.slots.iter_mut().enumerate() {
            if !slot.backoff.is_ready(now) {
                continue;
            }

            match slot.tracker.announce(request).await {
                Ok(response) => {
                    slot.backoff.record_success();
                    self.last_success = Some(index);
                    if let Some(ref warning) = response.warning_message {
                        warn!(tracker = %slot.tracker.url(), "tracker warning: {}", warning);
                    }
                    debug!(
                        tracker = %slot.tracker.url(),
                        peers = response.peers.len() + response.peers6.len(),
                        interval = response.interval,
                        "announce succeeded"
                    );
                    return Ok(response);
                }
                Err(e) => {
                    let retry = slot.backoff.record_failure(now);
                    warn!(
                        tracker = %slot.tracker.url(),
                        error = %e,
                        failures = slot.backoff.failures(),
                        retry_in = ?retry.map(|at| at.saturating_duration_since(now)),
                        "announce failed"
                    );
                    last_error = Some(e);
                }
            }
        }

        if self.is_exhausted() {
            return Err(TrackerError::Exhausted);
        }
        Err(last_error.unwrap_or(TrackerError::BackingOff))
    }

    /// Sends a one-off event (such as `stopped`) to the tracker that last
    /// answered. Does not touch any retry state.
    pub async fn notify(&mut self, request: &AnnounceRequest) -> Result<(), TrackerError> {
        let index = self.last_success.ok_or(TrackerError::Exhausted)?;
        let slot = self
            .slots
            .get_mut(index)
            .ok_or(TrackerError::Exhausted)?;
        slot.tracker.announce(request).await.map(|_| ())
    }

    /// Consecutive failures per tracker URL, in announce order.
    pub fn failures(&self) -> Vec<(&str, u32)> {
        self.slots
            .iter()
            .map(|slot| (slot.tracker.url(), slot.backoff.failures()))
            .collect()
    }
}
