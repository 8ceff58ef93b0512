//! Confidence routing.
//!
//! Maps a plan's confidence to one of three actions with two thresholds:
//!
//! | confidence | action | needs approval |
//! |------------|--------|----------------|
//! | `>= conf_auto` | `auto_fix` | no |
//! | `>= conf_min`, `< conf_auto` | `needs_human` | yes |
//! | `< conf_min` | `discard` | yes |
//!
//! Each run is routed independently. The thresholds also gate the side
//! effects: notification needs `conf_min`, ticket creation needs `conf_auto`.

use serde::Serialize;

use crate::error::Error;
use crate::models::{NextAction, NotificationStatus, TicketStatus};
use crate::providers::TicketOutcome;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Thresholds {
    conf_min: f64,
    conf_auto: f64,
}

impl Thresholds {
    /// Requires `0 <= conf_min <= conf_auto <= 1`.
    pub fn new(conf_min: f64, conf_auto: f64) -> Result<Self, Error> {
        if !(0.0..=1.0).contains(&conf_min) || !(0.0..=1.0).contains(&conf_auto) {
            return Err(Error::invalid("confidence thresholds must be in [0.0, 1.0]"));
        }
        if conf_min > conf_auto {
            return Err(Error::invalid("conf_min must not exceed conf_auto"));
        }
        Ok(Self {
            conf_min,
            conf_auto,
        })
    }

    pub fn conf_min(&self) -> f64 {
        self.conf_min
    }

    pub fn conf_auto(&self) -> f64 {
        self.conf_auto
    }
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            conf_min: 0.65,
            conf_auto: 0.80,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Route {
    pub action: NextAction,
    pub needs_approval: bool,
}

impl Route {
    /// The notifier may only be invoked at or above `conf_min`.
    pub fn allows_notification(&self) -> bool {
        self.action != NextAction::Discard
    }

    /// Tickets are only opened for plans confident enough to auto-fix.
    pub fn allows_ticket(&self) -> bool {
        self.action == NextAction::AutoFix
    }
}

/// Route a confidence score. NaN is treated as zero.
pub fn route(confidence: f64, thresholds: &Thresholds) -> Route {
    let confidence = if confidence.is_nan() { 0.0 } else { confidence };
    let action = if confidence >= thresholds.conf_auto {
        NextAction::AutoFix
    } else if confidence >= thresholds.conf_min {
        NextAction::NeedsHuman
    } else {
        NextAction::Discard
    };
    Route {
        action,
        needs_approval: action != NextAction::AutoFix,
    }
}

/// Notification status when the notifier must not be called, or `None`
/// when it should be.
pub fn gated_notification(route: &Route, notify_requested: bool) -> Option<NotificationStatus> {
    if !route.allows_notification() {
        Some(NotificationStatus::SkippedLowConf)
    } else if !notify_requested {
        Some(NotificationStatus::NotRequested)
    } else {
        None
    }
}

pub fn notification_status(message_id: Option<&str>) -> NotificationStatus {
    match message_id {
        Some(_) => NotificationStatus::Posted,
        None => NotificationStatus::PostFailed,
    }
}

pub fn ticket_status(outcome: &TicketOutcome) -> TicketStatus {
    if outcome.ok {
        TicketStatus::Created
    } else {
        TicketStatus::Skipped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn thresholds() -> Thresholds {
        Thresholds::new(0.65, 0.80).unwrap()
    }

    #[test]
    fn boundaries() {
        let t = thresholds();
        assert_eq!(route(0.0, &t).action, NextAction::Discard);
        assert_eq!(route(0.649, &t).action, NextAction::Discard);
        assert_eq!(route(0.65, &t).action, NextAction::NeedsHuman);
        assert_eq!(route(0.7999, &t).action, NextAction::NeedsHuman);
        assert_eq!(route(0.80, &t).action, NextAction::AutoFix);
        assert_eq!(route(1.0, &t).action, NextAction::AutoFix);
    }

    #[test]
    fn approval_flag_follows_action() {
        let t = thresholds();
        assert!(route(0.1, &t).needs_approval);
        assert!(route(0.70, &t).needs_approval);
        assert!(!route(0.95, &t).needs_approval);
    }

    #[test]
    fn monotonic_in_confidence() {
        let t = thresholds();
        let mut previous = NextAction::Discard;
        for step in 0..=1000 {
            let action = route(step as f64 / 1000.0, &t).action;
            assert!(action >= previous, "route regressed at {}", step);
            previous = action;
        }
    }

    #[test]
    fn nan_is_discarded() {
        assert_eq!(route(f64::NAN, &thresholds()).action, NextAction::Discard);
    }

    #[test]
    fn equal_thresholds_skip_needs_human() {
        let t = Thresholds::new(0.5, 0.5).unwrap();
        assert_eq!(route(0.49, &t).action, NextAction::Discard);
        assert_eq!(route(0.5, &t).action, NextAction::AutoFix);
    }

    #[test]
    fn invalid_thresholds_rejected() {
        assert!(Thresholds::new(0.9, 0.8).is_err());
        assert!(Thresholds::new(-0.1, 0.8).is_err());
        assert!(Thresholds::new(0.5, 1.1).is_err());
    }

    #[test]
    fn side_effect_gates() {
        let t = thresholds();
        let mid = route(0.70, &t);
        assert!(mid.allows_notification());
        assert!(!mid.allows_ticket());
        let low = route(0.2, &t);
        assert!(!low.allows_notification());
        assert_eq!(
            gated_notification(&low, true),
            Some(NotificationStatus::SkippedLowConf)
        );
        assert_eq!(
            gated_notification(&mid, false),
            Some(NotificationStatus::NotRequested)
        );
        assert_eq!(gated_notification(&mid, true), None);
        assert!(route(0.9, &t).allows_ticket());
    }
}
