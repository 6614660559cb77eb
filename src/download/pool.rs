use std::collections::{HashMap, HashSet, VecDeque};
use std::net::SocketAddr;
use std::time::Duration;

use tokio::time::Instant;

/// Addresses waiting to be dialled, and the ones currently in use.
///
/// An address appears at most once, either queued or connected. One whose
/// sessions keep failing is retried after a growing delay and forgotten
/// after `max_attempts` failures.
#[derive(Debug)]
pub(crate) struct PeerPool {
    queue: VecDeque<(SocketAddr, Instant)>,
    connected: HashSet<SocketAddr>,
    failures: HashMap<SocketAddr, u32>,
    max_attempts: u32,
    retry_delay: Duration,
}

impl PeerPool {
    pub(crate) fn new(max_attempts: u32, retry_delay: Duration) -> Self {
        Self {
            queue: VecDeque::new(),
            connected: HashSet::new(),
            failures: HashMap::new(),
            max_attempts: max_attempts.max(1),
            retry_delay,
        }
    }

    /// Queues `addr` for an immediate attempt. Returns false if it is
    /// already known or has used up its attempts.
    pub(crate) fn add(&mut self, addr: SocketAddr, now: Instant) -> bool {
        if self.connected.contains(&addr)
            || self.queue.iter().any(|(queued, _)| *queued == addr)
            || self.is_forgotten(&addr)
        {
            return false;
        }
        self.queue.push_back((addr, now));
        true
    }

    /// Takes the first address whose retry time has come and marks it
    /// connected.
    pub(crate) fn pop_ready(&mut self, now: Instant) -> Option<SocketAddr> {
        let position = self.queue.iter().position(|(_, at)| *at <= now)?;
        let (addr, _) = self.queue.remove(position)?;
        self.connected.insert(addr);
        Some(addr)
    }

    /// The session for `addr` ended cleanly.
    pub(crate) fn release(&mut self, addr: SocketAddr) {
        self.connected.remove(&addr);
        self.failures.remove(&addr);
    }

    /// The session for `addr` failed. Unless `retry` is false or its
    /// attempts are spent, the address is queued again after a delay.
    pub(crate) fn fail(&mut self, addr: SocketAddr, now: Instant, retry: bool) {
        self.connected.remove(&addr);
        let failures = self.failures.entry(addr).or_insert(0);
        if !retry {
            *failures = self.max_attempts;
            return;
        }
        *failures += 1;
        if *failures < self.max_attempts {
            let at = now + self.retry_delay.saturating_mul(*failures);
            self.queue.push_back((addr, at));
        }
    }

    pub(crate) fn queued(&self) -> usize {
        self.queue.len()
    }

    pub(crate) fn connected(&self) -> usize {
        self.connected.len()
    }

    fn is_forgotten(&self, addr: &SocketAddr) -> bool {
        self.failures
            .get(addr)
            .is_some_and(|&failures| failures >= self.max_attempts)
    }
}
