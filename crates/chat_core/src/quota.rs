//! crates/chat_core/src/quota.rs
//!
//! The tier & quota engine.
//!
//! Image generation is rationed per rolling window. The window is evaluated
//! lazily at the point of use: `can_generate` only reads, and `increment`
//! is the single place the counter and window start are written.

use crate::domain::{ImageUsage, Tier, UpgradeEntry, UserRecord};
use crate::error::{CoreError, CoreResult};
use crate::timestamp;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::info;

/// Length of the rolling quota window.
pub const RESET_WINDOW_HOURS: i64 = 8;

pub fn reset_window() -> Duration {
    Duration::hours(RESET_WINDOW_HOURS)
}

//=========================================================================================
// Static Plan Table
//=========================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TierPlan {
    pub tier: Tier,
    pub name: &'static str,
    pub price: f64,
    pub images_per_window: u32,
}

pub const TIER_PLANS: [TierPlan; 3] = [
    TierPlan {
        tier: Tier::Free,
        name: "Free",
        price: 0.0,
        images_per_window: 2,
    },
    TierPlan {
        tier: Tier::Premium,
        name: "Premium",
        price: 4.99,
        images_per_window: 10,
    },
    // High but finite.
    TierPlan {
        tier: Tier::Unlimited,
        name: "Unlimited",
        price: 9.99,
        images_per_window: 100,
    },
];

impl Tier {
    pub fn plan(self) -> &'static TierPlan {
        match self {
            Tier::Free => &TIER_PLANS[0],
            Tier::Premium => &TIER_PLANS[1],
            Tier::Unlimited => &TIER_PLANS[2],
        }
    }
}

//=========================================================================================
// Check and Commit
//=========================================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QuotaStatus {
    pub allowed: bool,
    pub remaining: u32,
    pub limit: u32,
    pub next_reset: DateTime<Utc>,
    pub reset_seconds: i64,
    pub tier: Tier,
}

enum Window {
    /// The window started at this instant and is still running.
    Running(DateTime<Utc>),
    /// A full window has passed since the last reset.
    Elapsed,
    /// The stored start is unparseable; treated as starting now.
    Unknown,
}

fn window(usage: &ImageUsage, now: DateTime<Utc>) -> Window {
    match timestamp::parse(&usage.last_reset) {
        None => Window::Unknown,
        Some(last_reset) if now - last_reset >= reset_window() => Window::Elapsed,
        Some(last_reset) => Window::Running(last_reset),
    }
}

/// Reports whether the record may generate an image now. Never mutates.
pub fn can_generate(record: &UserRecord, now: DateTime<Utc>) -> QuotaStatus {
    let limit = record.tier.plan().images_per_window;
    let started = match window(&record.image_usage, now) {
        Window::Elapsed => {
            return QuotaStatus {
                allowed: limit > 0,
                remaining: limit,
                limit,
                next_reset: now + reset_window(),
                reset_seconds: reset_window().num_seconds(),
                tier: record.tier,
            };
        }
        Window::Running(last_reset) => last_reset,
        Window::Unknown => now,
    };
    let count = record.image_usage.count;
    let next_reset = started + reset_window();
    QuotaStatus {
        allowed: count < limit,
        remaining: limit.saturating_sub(count),
        limit,
        next_reset,
        reset_seconds: (next_reset - now).num_seconds().max(0),
        tier: record.tier,
    }
}

/// Like `can_generate`, but a denial becomes `QuotaExceeded`.
pub fn ensure_allowed(record: &UserRecord, now: DateTime<Utc>) -> CoreResult<QuotaStatus> {
    let status = can_generate(record, now);
    if status.allowed {
        Ok(status)
    } else {
        Err(CoreError::QuotaExceeded {
            reset_seconds: status.reset_seconds,
            tier: status.tier,
            limit: status.limit,
        })
    }
}

/// Counts one generated image, first rolling the window over if it elapsed.
pub fn increment(record: &mut UserRecord, now: DateTime<Utc>) {
    match window(&record.image_usage, now) {
        Window::Elapsed => {
            info!(tier = %record.tier, "Image quota window elapsed, resetting counter.");
            record.image_usage = ImageUsage::fresh(now);
        }
        Window::Unknown => {
            record.image_usage.last_reset = timestamp::format(now);
        }
        Window::Running(_) => {}
    }
    record.image_usage.count = record.image_usage.count.saturating_add(1);
}

//=========================================================================================
// Tier Changes
//=========================================================================================

/// Moves the record to another tier, upgrade or downgrade alike. Every
/// change is logged in `upgrade_history` and grants a fresh window.
pub fn upgrade(record: &mut UserRecord, new_tier: &str, now: DateTime<Utc>) -> CoreResult<UpgradeEntry> {
    let tier: Tier = new_tier.parse()?;
    if tier == record.tier {
        return Err(CoreError::InvalidState(format!(
            "already on the {} tier",
            tier
        )));
    }
    let entry = UpgradeEntry {
        from_tier: record.tier,
        to_tier: tier,
        timestamp: timestamp::format(now),
        price: tier.plan().price,
    };
    record.upgrade_history.push(entry.clone());
    record.tier = tier;
    record.image_usage = ImageUsage::fresh(now);
    info!(from = %entry.from_tier, to = %entry.to_tier, "Changed subscription tier.");
    Ok(entry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 8, 0, 0).unwrap()
    }

    fn free_record() -> UserRecord {
        UserRecord::new(start())
    }

    #[test]
    fn test_fresh_free_record_has_two_images() {
        let status = can_generate(&free_record(), start());
        assert!(status.allowed);
        assert_eq!(status.remaining, 2);
        assert_eq!(status.limit, 2);
        assert_eq!(status.tier, Tier::Free);
        assert_eq!(status.reset_seconds, 8 * 3600);
    }

    #[test]
    fn test_free_tier_is_exhausted_after_two_increments() {
        let mut record = free_record();
        let now = start() + Duration::minutes(30);
        increment(&mut record, now);
        increment(&mut record, now);
        let status = can_generate(&record, now);
        assert!(!status.allowed);
        assert_eq!(status.remaining, 0);
        assert_eq!(status.next_reset, start() + reset_window());
        assert_eq!(status.reset_seconds, 7 * 3600 + 30 * 60);
    }

    #[test]
    fn test_increment_after_window_elapses_restarts_count() {
        let mut record = free_record();
        increment(&mut record, start());
        increment(&mut record, start());

        let later = start() + Duration::hours(9);
        increment(&mut record, later);
        assert_eq!(record.image_usage.count, 1);
        assert_eq!(record.image_usage.last_reset, timestamp::format(later));

        let status = can_generate(&record, later);
        assert!(status.allowed);
        assert_eq!(status.remaining, 1);
    }

    #[test]
    fn test_can_generate_never_mutates() {
        let mut record = free_record();
        increment(&mut record, start());
        let before = record.clone();
        for hours in [0, 4, 8, 9, 48] {
            let _ = can_generate(&record, start() + Duration::hours(hours));
        }
        assert_eq!(record, before);
    }

    #[test]
    fn test_elapsed_window_reports_full_quota_without_resetting() {
        let mut record = free_record();
        increment(&mut record, start());
        increment(&mut record, start());
        let later = start() + Duration::hours(8);
        let status = can_generate(&record, later);
        assert!(status.allowed);
        assert_eq!(status.remaining, 2);
        assert_eq!(status.next_reset, later + reset_window());
        assert_eq!(record.image_usage.count, 2);
    }

    #[test]
    fn test_unparseable_last_reset_is_repaired_on_increment() {
        let mut record = free_record();
        record.image_usage = ImageUsage {
            last_reset: "not a date".to_string(),
            count: 1,
        };
        let now = start() + Duration::hours(1);
        let status = can_generate(&record, now);
        assert!(status.allowed);
        assert_eq!(status.remaining, 1);
        assert_eq!(status.reset_seconds, 8 * 3600);

        increment(&mut record, now);
        assert_eq!(record.image_usage.last_reset, timestamp::format(now));
        assert_eq!(record.image_usage.count, 2);
    }

    #[test]
    fn test_ensure_allowed_reports_countdown() {
        let mut record = free_record();
        increment(&mut record, start());
        increment(&mut record, start());
        let err = ensure_allowed(&record, start() + Duration::hours(2)).unwrap_err();
        match err {
            CoreError::QuotaExceeded {
                reset_seconds,
                tier,
                limit,
            } => {
                assert_eq!(reset_seconds, 6 * 3600);
                assert_eq!(tier, Tier::Free);
                assert_eq!(limit, 2);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_upgrade_to_premium_grants_fresh_window() {
        let mut record = free_record();
        increment(&mut record, start());
        let now = start() + Duration::hours(1);
        let entry = upgrade(&mut record, "premium", now).unwrap();

        assert_eq!(record.tier, Tier::Premium);
        assert_eq!(record.image_usage.count, 0);
        assert_eq!(record.image_usage.last_reset, timestamp::format(now));
        assert_eq!(record.upgrade_history.len(), 1);
        assert_eq!(entry.from_tier, Tier::Free);
        assert_eq!(entry.to_tier, Tier::Premium);
        assert_eq!(entry.price, 4.99);
        assert_eq!(can_generate(&record, now).remaining, 10);
    }

    #[test]
    fn test_downgrade_is_logged_like_an_upgrade() {
        let mut record = free_record();
        upgrade(&mut record, "unlimited", start()).unwrap();
        upgrade(&mut record, "free", start()).unwrap();
        assert_eq!(record.tier, Tier::Free);
        assert_eq!(record.upgrade_history.len(), 2);
        assert_eq!(record.upgrade_history[1].from_tier, Tier::Unlimited);
    }

    #[test]
    fn test_upgrade_to_current_tier_leaves_record_unchanged() {
        let mut record = free_record();
        increment(&mut record, start());
        let before = record.clone();
        assert!(matches!(
            upgrade(&mut record, "free", start()),
            Err(CoreError::InvalidState(_))
        ));
        assert_eq!(record, before);
    }

    #[test]
    fn test_upgrade_to_unknown_tier_is_rejected() {
        let mut record = free_record();
        let before = record.clone();
        assert!(matches!(
            upgrade(&mut record, "diamond", start()),
            Err(CoreError::InvalidArgument(_))
        ));
        assert_eq!(record, before);
    }
}
