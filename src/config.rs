//! Runtime flags for the query subsystem.
//!
//! Every flag carries a validator that runs at startup, before the value is
//! ever consulted; an out-of-range value is a hard configuration error, not a
//! silently clamped one. Embedders can register additional validators for
//! deployment-specific constraints.

use serde::{Deserialize, Serialize};

use crate::types::{Result, VesperError};

/// Upper bound accepted for `query_plan_cache_ttl`, in seconds.
const MAX_PLAN_CACHE_TTL: i32 = 3600;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryFlags {
    /// When true, the planner explores alternative scan origins and keeps
    /// the cheapest candidate; when false, plans strictly left to right.
    pub query_cost_planner: bool,
    /// When true, compiled plans are cached by stripped-query hash.
    pub query_plan_cache: bool,
    /// Cached plans older than this many seconds are treated as absent on
    /// the next lookup (and removed).
    pub query_plan_cache_ttl: i32,
}

impl Default for QueryFlags {
    fn default() -> Self {
        Self {
            query_cost_planner: true,
            query_plan_cache: true,
            query_plan_cache_ttl: 60,
        }
    }
}

/// Startup validator hook. Returns a human-readable complaint on rejection.
pub type FlagValidator = fn(&QueryFlags) -> std::result::Result<(), String>;

fn ttl_in_range(flags: &QueryFlags) -> std::result::Result<(), String> {
    if (0..=MAX_PLAN_CACHE_TTL).contains(&flags.query_plan_cache_ttl) {
        Ok(())
    } else {
        Err(format!(
            "expected query_plan_cache_ttl to be in range [0, {}], got {}",
            MAX_PLAN_CACHE_TTL, flags.query_plan_cache_ttl
        ))
    }
}

impl QueryFlags {
    /// Runs the built-in range validators plus any registered extras.
    /// Call once at startup; a failure must abort configuration loading.
    pub fn validate_with(&self, extra: &[FlagValidator]) -> Result<()> {
        let builtin: &[FlagValidator] = &[ttl_in_range];
        for validator in builtin.iter().chain(extra) {
            validator(self).map_err(VesperError::Config)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        self.validate_with(&[])
    }
}

#[cfg(test)]
mod tests {
    use super::QueryFlags;

    #[test]
    fn defaults_pass_validation() {
        QueryFlags::default().validate().unwrap();
    }

    #[test]
    fn negative_ttl_rejected() {
        let flags = QueryFlags {
            query_plan_cache_ttl: -1,
            ..QueryFlags::default()
        };
        assert!(flags.validate().is_err());
    }

    #[test]
    fn extra_validator_runs() {
        let flags = QueryFlags::default();
        let deny = |_: &QueryFlags| Err("nope".to_owned());
        assert!(flags.validate_with(&[deny]).is_err());
    }
}
