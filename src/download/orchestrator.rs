use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::{JoinError, JoinSet};
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, info, warn};

use super::error::{DownloadError, StallReason};
use super::pool::PeerPool;
use crate::config::DownloadConfig;
use crate::metainfo::Metainfo;
use crate::peer::{PeerError, PeerSession, SessionExit};
use crate::piece::{PieceManager, Progress};
use crate::storage::PieceSink;
use crate::tracker::{AnnounceRequest, Announcer, TrackerError, TrackerEvent};

type SessionResult = (SocketAddr, Result<SessionExit, PeerError>);

/// Drives one download: announces, dials peers, watches for completion,
/// stalls and corruption, and tears everything down at the end.
pub(crate) struct Orchestrator {
    metainfo: Arc<Metainfo>,
    manager: Arc<PieceManager>,
    sink: Arc<dyn PieceSink>,
    config: DownloadConfig,
    announcer: Announcer,
    pool: PeerPool,
    sessions: JoinSet<SessionResult>,
    shutdown: watch::Sender<bool>,
    progress: watch::Sender<Progress>,
    started: bool,
    last_announce: Option<Instant>,
    next_announce: Option<Instant>,
    last_verified: usize,
    last_progress_at: Instant,
    starving_since: Option<Instant>,
}

impl Orchestrator {
    pub(crate) fn new(
        metainfo: Arc<Metainfo>,
        sink: Arc<dyn PieceSink>,
        config: DownloadConfig,
    ) -> (Self, watch::Receiver<Progress>) {
        let manager = PieceManager::new(&metainfo.info, sink.clone())
            .with_strategy(config.strategy)
            .with_hash_budget(config.max_hash_failures, config.max_hash_failure_peers);
        let announcer = Announcer::new(
            &metainfo.trackers(),
            config.tracker_backoff(),
            config.tracker_timeout,
        );

        let now = Instant::now();
        let mut pool = PeerPool::new(config.max_connect_attempts, config.peer_retry_delay);
        for addr in &config.peers {
            pool.add(*addr, now);
        }

        let (progress, progress_rx) = watch::channel(manager.progress());
        let (shutdown, _) = watch::channel(false);
        let next_announce = (!announcer.is_empty()).then_some(now);

        let orchestrator = Self {
            metainfo,
            manager: Arc::new(manager),
            sink,
            config,
            announcer,
            pool,
            sessions: JoinSet::new(),
            shutdown,
            progress,
            started: false,
            last_announce: None,
            next_announce,
            last_verified: 0,
            last_progress_at: now,
            starving_since: None,
        };
        (orchestrator, progress_rx)
    }

    pub(crate) async fn run(
        mut self,
        mut cancel: watch::Receiver<bool>,
    ) -> Result<Progress, DownloadError> {
        info!(
            name = %self.metainfo.info.name,
            info_hash = %self.metainfo.info_hash,
            pieces = self.manager.piece_count(),
            trackers = self.announcer.len(),
            peers = self.pool.queued(),
            "download starting"
        );

        let result = self.drive(&mut cancel).await;

        self.stop_sessions().await;
        self.publish_progress();
        self.announce_final(result.is_ok()).await;

        match &result {
            Ok(progress) => info!(
                name = %self.metainfo.info.name,
                bytes = progress.bytes_verified,
                "download complete"
            ),
            Err(e) => warn!(name = %self.metainfo.info.name, error = %e, "download stopped"),
        }
        result
    }

    async fn drive(
        &mut self,
        cancel: &mut watch::Receiver<bool>,
    ) -> Result<Progress, DownloadError> {
        let mut work = self.manager.work_changed();

        loop {
            self.check_health()?;

            if self.manager.is_complete() {
                tokio::select! {
                    flushed = self.sink.flush() => flushed?,
                    _ = cancelled(cancel) => return Err(DownloadError::Cancelled),
                }
                return Ok(self.manager.progress());
            }

            let now = Instant::now();
            self.track_progress(now);

            if self.announce_due(now) {
                tokio::select! {
                    announced = self.announce(now) => announced?,
                    _ = cancelled(cancel) => return Err(DownloadError::Cancelled),
                }
            }

            let now = Instant::now();
            self.spawn_sessions(now);
            self.check_stall(now)?;

            tokio::select! {
                Some(joined) = self.sessions.join_next() => self.on_session_end(joined),
                _ = work.changed() => {}
                _ = cancelled(cancel) => return Err(DownloadError::Cancelled),
                _ = sleep(self.config.tick_interval) => {}
            }
        }
    }

    fn check_health(&self) -> Result<(), DownloadError> {
        if let Some(e) = self.manager.take_storage_error() {
            return Err(e.into());
        }
        if let Some((piece, failures)) = self.manager.exhausted_piece() {
            return Err(DownloadError::Stalled(StallReason::PersistentCorruption {
                piece,
                failures,
            }));
        }
        Ok(())
    }

    fn track_progress(&mut self, now: Instant) {
        let verified = self.publish_progress().pieces_verified;
        if verified > self.last_verified {
            self.last_verified = verified;
            self.last_progress_at = now;
        }
    }

    fn publish_progress(&self) -> Progress {
        let current = self.manager.progress();
        self.progress.send_if_modified(|published| {
            if *published == current {
                return false;
            }
            *published = current;
            true
        });
        current
    }

    /// Nothing queued to dial, no block outstanding with any session, and
    /// no connected peer has an unclaimed block to give.
    fn is_starving(&self) -> bool {
        if self.pool.queued() > 0 {
            return false;
        }
        self.sessions.is_empty()
            || (self.manager.claimed_blocks() == 0 && !self.manager.has_available_work())
    }

    /// Regular announces follow the tracker's interval; a starving download
    /// asks again once `min_reannounce` has passed.
    fn announce_due(&self, now: Instant) -> bool {
        let Some(mut due) = self.next_announce else {
            return false;
        };
        if self.is_starving() {
            if let Some(last) = self.last_announce {
                due = due.min(last + self.config.min_reannounce);
            }
        }
        now >= due
    }

    async fn announce(&mut self, now: Instant) -> Result<(), DownloadError> {
        let event = if self.started {
            TrackerEvent::None
        } else {
            TrackerEvent::Started
        };
        let request = self.announce_request(event);

        match self.announcer.announce(&request, now.into_std()).await {
            Ok(response) => {
                self.started = true;
                let now = Instant::now();
                let added = response
                    .all_peers()
                    .filter(|addr| self.pool.add(**addr, now))
                    .count();
                debug!(
                    peers = added,
                    queued = self.pool.queued(),
                    connected = self.pool.connected(),
                    "tracker peers queued"
                );

                let min_interval =
                    Duration::from_secs(response.min_interval.unwrap_or(0) as u64);
                let wait = if self.is_starving() {
                    self.config.min_reannounce.max(min_interval)
                } else {
                    response.reannounce_after()
                };
                self.last_announce = Some(now);
                self.next_announce = Some(now + wait);
                Ok(())
            }
            Err(TrackerError::Exhausted) => {
                self.next_announce = None;
                if self.is_starving() && self.sessions.is_empty() {
                    return Err(TrackerError::Exhausted.into());
                }
                warn!("all trackers exhausted, continuing with known peers");
                Ok(())
            }
            Err(e) => {
                debug!(error = %e, "announce deferred");
                self.next_announce = self
                    .announcer
                    .next_attempt_at(now.into_std())
                    .map(Instant::from_std);
                Ok(())
            }
        }
    }

    fn announce_request(&self, event: TrackerEvent) -> AnnounceRequest {
        let progress = self.manager.progress();
        AnnounceRequest {
            info_hash: self.metainfo.info_hash,
            peer_id: self.config.peer_id.0,
            port: self.config.port,
            uploaded: 0,
            downloaded: progress.bytes_verified,
            left: self
                .metainfo
                .info
                .total_length
                .saturating_sub(progress.bytes_verified),
            event,
        }
    }

    fn spawn_sessions(&mut self, now: Instant) {
        while self.sessions.len() < self.config.max_peers {
            let Some(addr) = self.pool.pop_ready(now) else {
                break;
            };
            let session = PeerSession::new(
                addr,
                self.metainfo.info_hash,
                self.config.peer_id,
                self.manager.clone(),
                self.shutdown.subscribe(),
            )
            .with_config(self.config.session.clone());

            debug!(peer = %addr, active = self.sessions.len() + 1, "starting session");
            self.sessions.spawn(async move {
                let result = session.run().await;
                (addr, result)
            });
        }
    }

    fn on_session_end(&mut self, joined: Result<SessionResult, JoinError>) {
        match joined {
            Ok((addr, Ok(exit))) => {
                debug!(peer = %addr, ?exit, "session ended");
                self.pool.release(addr);
            }
            Ok((addr, Err(e))) => {
                let retry = !matches!(
                    e,
                    PeerError::HandshakeMismatch | PeerError::InvalidHandshake
                );
                debug!(peer = %addr, error = %e, retry, "session failed");
                self.pool.fail(addr, Instant::now(), retry);
            }
            Err(e) => warn!(error = %e, "peer task failed"),
        }
    }

    /// Fails once the download has been starving, without a newly verified
    /// piece, for the whole stall timeout.
    fn check_stall(&mut self, now: Instant) -> Result<(), DownloadError> {
        if !self.is_starving() {
            self.starving_since = None;
            return Ok(());
        }
        let since = *self.starving_since.get_or_insert(now);
        if self.sessions.is_empty() && !self.announcer.is_empty() && self.announcer.is_exhausted()
        {
            return Err(TrackerError::Exhausted.into());
        }
        let idle = now.saturating_duration_since(since.max(self.last_progress_at));
        if idle >= self.config.stall_timeout {
            warn!(
                idle_secs = idle.as_secs(),
                verified = self.last_verified,
                "no peers can make progress"
            );
            return Err(DownloadError::Stalled(StallReason::NoPeers));
        }
        Ok(())
    }

    /// Signals every session to stop, then aborts whatever is still running
    /// after the grace period. Aborted sessions return their claims on drop.
    async fn stop_sessions(&mut self) {
        if self.sessions.is_empty() {
            return;
        }
        let _ = self.shutdown.send(true);

        let sessions = &mut self.sessions;
        let drained = timeout(self.config.shutdown_grace, async {
            while let Some(joined) = sessions.join_next().await {
                if let Ok((addr, result)) = joined {
                    debug!(peer = %addr, ?result, "session stopped");
                }
            }
        })
        .await;

        if drained.is_err() {
            debug!(remaining = self.sessions.len(), "aborting sessions");
            self.sessions.shutdown().await;
        }
    }

    /// Best effort; failures are only logged.
    async fn announce_final(&mut self, completed: bool) {
        if !self.started {
            return;
        }
        let events: &[TrackerEvent] = if completed {
            &[TrackerEvent::Completed, TrackerEvent::Stopped]
        } else {
            &[TrackerEvent::Stopped]
        };
        for &event in events {
            let request = self.announce_request(event);
            if let Err(e) = self.announcer.notify(&request).await {
                debug!(event = event.as_str(), error = %e, "final announce failed");
            }
        }
    }
}

/// Resolves once cancellation is requested or the handle is gone.
async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    let _ = cancel.wait_for(|stop| *stop).await;
}
