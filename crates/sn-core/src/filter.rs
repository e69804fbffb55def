//! Inbound message filter
//!
//! Decides whether a single inbound message gets a reply. Pure function of
//! the message and the process start time.

use chrono::{DateTime, Utc};

use crate::config::FilterConfig;
use crate::gateway::InboundMessage;

/// Why a message was ignored
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    /// Sent by this account
    FromSelf,
    /// Timestamped at or before process start
    Stale,
    /// Group conversation
    Group,
    /// Status/broadcast channel
    Status,
}

/// Filter decision
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Reply to this contact
    Respond(String),
    Ignore(IgnoreReason),
}

/// Message filter bound to the process start time
#[derive(Debug, Clone)]
pub struct MessageFilter {
    start_time: DateTime<Utc>,
    group_markers: Vec<String>,
    status_marker: String,
}

impl MessageFilter {
    pub fn new(start_time: DateTime<Utc>, config: &FilterConfig) -> Self {
        Self {
            start_time,
            group_markers: config.group_markers.clone(),
            status_marker: config.status_marker.clone(),
        }
    }

    pub fn start_time(&self) -> DateTime<Utc> {
        self.start_time
    }

    /// Apply the rules in order: self, stale, group, status
    pub fn evaluate(&self, msg: &InboundMessage) -> Verdict {
        if msg.from_me {
            return Verdict::Ignore(IgnoreReason::FromSelf);
        }
        if msg.timestamp <= self.start_time {
            return Verdict::Ignore(IgnoreReason::Stale);
        }
        if self.is_group(&msg.sender) {
            return Verdict::Ignore(IgnoreReason::Group);
        }
        if self.is_status(&msg.sender) {
            return Verdict::Ignore(IgnoreReason::Status);
        }
        Verdict::Respond(msg.sender.clone())
    }

    fn is_group(&self, sender: &str) -> bool {
        self.group_markers
            .iter()
            .any(|m| !m.is_empty() && sender.contains(m.as_str()))
    }

    fn is_status(&self, sender: &str) -> bool {
        !self.status_marker.is_empty() && sender.contains(&self.status_marker)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn start() -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000, 500_000_000).unwrap()
    }

    fn filter() -> MessageFilter {
        MessageFilter::new(start(), &FilterConfig::default())
    }

    fn msg(sender: &str, from_me: bool, timestamp: DateTime<Utc>) -> InboundMessage {
        InboundMessage {
            sender: sender.to_string(),
            from_me,
            timestamp,
            text: "hi".to_string(),
        }
    }

    #[test]
    fn test_fresh_direct_message_responds() {
        let m = msg("491701234567@s.whatsapp.net", false, start() + Duration::seconds(1));
        assert_eq!(
            filter().evaluate(&m),
            Verdict::Respond("491701234567@s.whatsapp.net".to_string())
        );
    }

    #[test]
    fn test_self_sent_ignored_regardless() {
        let f = filter();
        let later = start() + Duration::seconds(10);
        for sender in ["A", "123-456@g.us", "status@broadcast"] {
            assert_eq!(
                f.evaluate(&msg(sender, true, later)),
                Verdict::Ignore(IgnoreReason::FromSelf)
            );
        }
    }

    #[test]
    fn test_stale_messages_ignored() {
        let f = filter();
        assert_eq!(
            f.evaluate(&msg("A", false, start() - Duration::seconds(60))),
            Verdict::Ignore(IgnoreReason::Stale)
        );
        assert_eq!(
            f.evaluate(&msg("A", false, start())),
            Verdict::Ignore(IgnoreReason::Stale)
        );
        // same wall-clock second as a sub-second start time is still stale
        let same_second = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        assert_eq!(
            f.evaluate(&msg("A", false, same_second)),
            Verdict::Ignore(IgnoreReason::Stale)
        );
    }

    #[test]
    fn test_group_ignored() {
        let m = msg("123-456@g.us", false, start() + Duration::seconds(1));
        assert_eq!(filter().evaluate(&m), Verdict::Ignore(IgnoreReason::Group));
    }

    #[test]
    fn test_current_group_jid_ignored() {
        let m = msg("120363025246125486@g.us", false, start() + Duration::seconds(1));
        assert_eq!(filter().evaluate(&m), Verdict::Ignore(IgnoreReason::Group));
    }

    #[test]
    fn test_empty_group_markers_never_match() {
        let config = FilterConfig {
            group_markers: vec![String::new()],
            ..Default::default()
        };
        let f = MessageFilter::new(start(), &config);
        let m = msg("120363025246125486@g.us", false, start() + Duration::seconds(1));
        assert_eq!(f.evaluate(&m), Verdict::Respond("120363025246125486@g.us".to_string()));
    }

    #[test]
    fn test_status_ignored() {
        let m = msg("status@broadcast", false, start() + Duration::seconds(1));
        assert_eq!(filter().evaluate(&m), Verdict::Ignore(IgnoreReason::Status));
    }

    #[test]
    fn test_custom_markers() {
        let config = FilterConfig {
            group_markers: vec!["@g.us".to_string()],
            status_marker: "@broadcast".to_string(),
        };
        let f = MessageFilter::new(start(), &config);
        let later = start() + Duration::seconds(1);

        assert_eq!(
            f.evaluate(&msg("a-b@s.whatsapp.net", false, later)),
            Verdict::Respond("a-b@s.whatsapp.net".to_string())
        );
        assert_eq!(
            f.evaluate(&msg("1203@g.us", false, later)),
            Verdict::Ignore(IgnoreReason::Group)
        );
    }
}
