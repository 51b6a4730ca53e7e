use std::{
    collections::VecDeque,
    time::{Duration, Instant},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Severity {
    Success,
    Error,
}

/// User-facing alert.
#[derive(Clone, Debug, PartialEq)]
pub struct Notification {
    pub title: String,
    pub text: String,
    pub severity: Severity,
    pub closable: bool,
    pub duration: Duration,
}

impl Notification {
    pub fn success(title: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            text: text.into(),
            severity: Severity::Success,
            closable: true,
            duration: Duration::from_secs(3),
        }
    }

    pub fn error(title: impl Into<String>, text: impl Into<String>) -> Self {
        Self { severity: Severity::Error, ..Self::success(title, text) }
    }

    pub fn sticky(mut self) -> Self {
        self.closable = false;
        self
    }
}

/// Receives alerts from the core.
pub trait AlertSink {
    fn display(&mut self, notification: Notification);
}

impl AlertSink for Vec<Notification> {
    fn display(&mut self, notification: Notification) {
        self.push(notification);
    }
}

/// Alerts on screen, each expiring after its duration.
#[derive(Debug, Default)]
pub struct AlertQueue {
    shown: VecDeque<(Instant, Notification)>,
}

impl AlertQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drops alerts whose duration has elapsed at `now`.
    pub fn expire(&mut self, now: Instant) {
        self.shown
            .retain(|(at, n)| now.saturating_duration_since(*at) < n.duration);
    }

    /// Dismisses the oldest closable alert.
    pub fn dismiss(&mut self) -> Option<Notification> {
        let pos = self.shown.iter().position(|(_, n)| n.closable)?;
        self.shown.remove(pos).map(|(_, n)| n)
    }

    pub fn current(&self) -> impl Iterator<Item = &Notification> {
        self.shown.iter().map(|(_, n)| n)
    }

    pub fn is_empty(&self) -> bool {
        self.shown.is_empty()
    }
}

impl AlertSink for AlertQueue {
    fn display(&mut self, notification: Notification) {
        self.shown.push_back((Instant::now(), notification));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alerts_expire_after_their_duration() {
        let mut queue = AlertQueue::new();
        queue.display(Notification::error("Error", "boom"));
        queue.expire(Instant::now());
        assert!(!queue.is_empty());
        queue.expire(Instant::now() + Duration::from_secs(4));
        assert!(queue.is_empty());
    }

    #[test]
    fn sticky_alerts_cannot_be_dismissed() {
        let mut queue = AlertQueue::new();
        queue.display(Notification::error("Error logging in", "bad credentials").sticky());
        assert!(queue.dismiss().is_none());
        queue.display(Notification::success("Logged in", "ok"));
        assert_eq!(queue.dismiss().map(|n| n.title), Some("Logged in".to_string()));
    }
}
