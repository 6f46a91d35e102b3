//! Heartbeat monitor.
//!
//! While connected, a `ping` envelope goes out every `interval`. Each ping
//! arms an ack deadline that only the matching `pong` clears; if the
//! deadline passes first the connection is declared dead. No ping is sent
//! while one is still outstanding, and nothing runs while not connected.

use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, PartialEq, Eq)]
struct Outstanding {
    id: String,
    deadline: Instant,
}

#[derive(Debug)]
pub(crate) struct Heartbeat {
    interval: Duration,
    ack_timeout: Duration,
    next_ping_at: Option<Instant>,
    outstanding: Option<Outstanding>,
    sequence: u64,
}

impl Heartbeat {
    pub fn new(interval: Duration, ack_timeout: Duration) -> Self {
        Self {
            interval,
            ack_timeout,
            next_ping_at: None,
            outstanding: None,
            sequence: 0,
        }
    }

    pub fn is_enabled(&self) -> bool {
        !self.interval.is_zero()
    }

    /// Arm the ping timer; called on every transition into `connected`.
    pub fn start(&mut self, now: Instant) {
        self.outstanding = None;
        self.next_ping_at = self.is_enabled().then(|| now + self.interval);
    }

    /// Stop all timers; called whenever the connection leaves `connected`.
    pub fn suspend(&mut self) {
        self.next_ping_at = None;
        self.outstanding = None;
    }

    #[cfg(test)]
    pub fn is_running(&self) -> bool {
        self.next_ping_at.is_some() || self.outstanding.is_some()
    }

    /// When the next ping is due, unless one is awaiting its pong.
    pub fn next_ping_at(&self) -> Option<Instant> {
        match self.outstanding {
            Some(_) => None,
            None => self.next_ping_at,
        }
    }

    /// When the outstanding ping expires.
    pub fn ack_deadline(&self) -> Option<Instant> {
        self.outstanding.as_ref().map(|o| o.deadline)
    }

    /// Correlation id for the next ping.
    pub fn next_ping_id(&mut self) -> String {
        self.sequence += 1;
        format!("hb-{}", self.sequence)
    }

    /// Record a sent ping.
    pub fn ping_sent(&mut self, id: String, now: Instant) {
        self.next_ping_at = Some(now + self.interval);
        if !self.ack_timeout.is_zero() {
            self.outstanding = Some(Outstanding {
                id,
                deadline: now + self.ack_timeout,
            });
        }
    }

    /// Record a received pong. Only a pong echoing the outstanding ping's id
    /// acknowledges it; anonymous or stale pongs are ignored.
    pub fn pong_received(&mut self, id: Option<&str>) -> bool {
        let matches = match (&self.outstanding, id) {
            (Some(outstanding), Some(id)) => outstanding.id == id,
            _ => false,
        };
        if matches {
            self.outstanding = None;
        }
        matches
    }

    pub fn ack_timeout(&self) -> Duration {
        self.ack_timeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn heartbeat() -> Heartbeat {
        Heartbeat::new(Duration::from_secs(30), Duration::from_secs(10))
    }

    #[test]
    fn test_suspended_until_started() {
        let hb = heartbeat();
        assert!(!hb.is_running());
        assert_eq!(hb.next_ping_at(), None);
        assert_eq!(hb.ack_deadline(), None);
    }

    #[test]
    fn test_ping_arms_ack_deadline_and_blocks_next_ping() {
        let mut hb = heartbeat();
        let now = Instant::now();
        hb.start(now);
        assert_eq!(hb.next_ping_at(), Some(now + Duration::from_secs(30)));

        let id = hb.next_ping_id();
        hb.ping_sent(id, now);
        assert_eq!(hb.ack_deadline(), Some(now + Duration::from_secs(10)));
        assert_eq!(hb.next_ping_at(), None, "no new ping while one is outstanding");
    }

    #[test]
    fn test_matching_pong_clears_deadline() {
        let mut hb = heartbeat();
        let now = Instant::now();
        hb.start(now);
        let id = hb.next_ping_id();
        hb.ping_sent(id.clone(), now);

        assert!(!hb.pong_received(Some("hb-stale")));
        assert!(hb.ack_deadline().is_some());
        assert!(hb.pong_received(Some(&id)));
        assert_eq!(hb.ack_deadline(), None);
        assert_eq!(hb.next_ping_at(), Some(now + Duration::from_secs(30)));
    }

    #[test]
    fn test_anonymous_pong_does_not_acknowledge() {
        let mut hb = heartbeat();
        let now = Instant::now();
        hb.start(now);
        let id = hb.next_ping_id();
        hb.ping_sent(id.clone(), now);
        assert!(!hb.pong_received(None));
        assert_eq!(hb.ack_deadline(), Some(now + Duration::from_secs(10)));
        assert!(hb.pong_received(Some(&id)));
        assert!(!hb.pong_received(Some(&id)), "nothing left to acknowledge");
    }

    #[test]
    fn test_suspend_stops_all_timers() {
        let mut hb = heartbeat();
        let now = Instant::now();
        hb.start(now);
        let id = hb.next_ping_id();
        hb.ping_sent(id, now);
        hb.suspend();
        assert!(!hb.is_running());
        assert_eq!(hb.ack_deadline(), None);
    }

    #[test]
    fn test_zero_interval_disables_heartbeat() {
        let mut hb = Heartbeat::new(Duration::ZERO, Duration::from_secs(10));
        hb.start(Instant::now());
        assert!(!hb.is_enabled());
        assert!(!hb.is_running());
    }

    #[test]
    fn test_zero_ack_timeout_sends_pings_without_deadline() {
        let mut hb = Heartbeat::new(Duration::from_secs(5), Duration::ZERO);
        let now = Instant::now();
        hb.start(now);
        let id = hb.next_ping_id();
        hb.ping_sent(id, now);
        assert_eq!(hb.ack_deadline(), None);
        assert_eq!(hb.next_ping_at(), Some(now + Duration::from_secs(5)));
    }

    #[test]
    fn test_ping_ids_are_unique() {
        let mut hb = heartbeat();
        assert_ne!(hb.next_ping_id(), hb.next_ping_id());
    }
}
