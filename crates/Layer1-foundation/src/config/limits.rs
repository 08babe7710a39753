//! Quota limits - per-user conversion allowance
//!
//! A fixed default limit applies to every user except the owner, who is
//! never limited.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Default number of conversions per non-owner user
pub const DEFAULT_CONVERSION_LIMIT: u32 = 5;

/// Remaining allowance for a user
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Allowance {
    Limited(u32),
    Unlimited,
}

impl Allowance {
    pub fn is_unlimited(&self) -> bool {
        matches!(self, Allowance::Unlimited)
    }
}

impl fmt::Display for Allowance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Allowance::Limited(n) => write!(f, "{}", n),
            Allowance::Unlimited => write!(f, "Unlimited"),
        }
    }
}

/// Result of a quota check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaCheck {
    pub allowed: bool,
    pub remaining: Allowance,
}

/// Quota limit settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuotaLimits {
    /// Conversions allowed per non-owner user
    #[serde(default = "default_limit")]
    pub default_limit: u32,

    /// Owner identifier; bypasses the limit
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<String>,
}

fn default_limit() -> u32 {
    DEFAULT_CONVERSION_LIMIT
}

impl Default for QuotaLimits {
    fn default() -> Self {
        Self {
            default_limit: DEFAULT_CONVERSION_LIMIT,
            owner_id: None,
        }
    }
}

impl QuotaLimits {
    pub fn with_owner(mut self, owner_id: impl Into<String>) -> Self {
        self.owner_id = Some(owner_id.into());
        self
    }

    pub fn with_limit(mut self, limit: u32) -> Self {
        self.default_limit = limit;
        self
    }

    pub fn is_owner(&self, user_id: &str) -> bool {
        self.owner_id.as_deref() == Some(user_id)
    }

    /// Limit applying to `user_id`, `None` when unlimited
    pub fn limit_for(&self, user_id: &str) -> Option<u32> {
        if self.is_owner(user_id) {
            None
        } else {
            Some(self.default_limit)
        }
    }

    /// Check a user's current count against the limit
    pub fn check(&self, user_id: &str, count: u32) -> QuotaCheck {
        match self.limit_for(user_id) {
            None => QuotaCheck {
                allowed: true,
                remaining: Allowance::Unlimited,
            },
            Some(limit) => QuotaCheck {
                allowed: count < limit,
                remaining: Allowance::Limited(limit.saturating_sub(count)),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_limit() {
        let limits = QuotaLimits::default();
        assert_eq!(limits.default_limit, 5);
        assert_eq!(limits.limit_for("1"), Some(5));
    }

    #[test]
    fn test_check_under_and_at_limit() {
        let limits = QuotaLimits::default();

        let check = limits.check("1", 4);
        assert!(check.allowed);
        assert_eq!(check.remaining, Allowance::Limited(1));

        let check = limits.check("1", 5);
        assert!(!check.allowed);
        assert_eq!(check.remaining, Allowance::Limited(0));

        let check = limits.check("1", 9);
        assert!(!check.allowed);
        assert_eq!(check.remaining, Allowance::Limited(0));
    }

    #[test]
    fn test_owner_is_unlimited() {
        let limits = QuotaLimits::default().with_owner("owner");
        let check = limits.check("owner", 1_000);
        assert!(check.allowed);
        assert!(check.remaining.is_unlimited());
        assert_eq!(check.remaining.to_string(), "Unlimited");
    }

    #[test]
    fn test_deserialize_defaults() {
        let limits: QuotaLimits = serde_json::from_str("{}").unwrap();
        assert_eq!(limits.default_limit, DEFAULT_CONVERSION_LIMIT);
        assert!(limits.owner_id.is_none());
    }
}
