//! Compiled-plan and AST caches keyed by stripped-query hash.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::primitives::ConcurrentMap;
use crate::query::ast::AstStorage;
use crate::query::plan::physical::LogicalOperator;
use crate::query::symbols::SymbolTable;

/// One compiled query: the operator tree plus everything it points into.
/// The tree only references expressions of the sibling AST storage and
/// symbols of the sibling table, so the bundle is self-contained and safe to
/// share across concurrent executions.
pub struct CachedPlan {
    plan: LogicalOperator,
    cost: f64,
    symbol_table: SymbolTable,
    ast_storage: AstStorage,
    created_at: Instant,
}

impl CachedPlan {
    pub fn new(
        plan: LogicalOperator,
        cost: f64,
        symbol_table: SymbolTable,
        ast_storage: AstStorage,
    ) -> Self {
        Self {
            plan,
            cost,
            symbol_table,
            ast_storage,
            created_at: Instant::now(),
        }
    }

    pub fn plan(&self) -> &LogicalOperator {
        &self.plan
    }

    pub fn cost(&self) -> f64 {
        self.cost
    }

    pub fn symbol_table(&self) -> &SymbolTable {
        &self.symbol_table
    }

    pub fn ast_storage(&self) -> &AstStorage {
        &self.ast_storage
    }

    pub fn is_expired(&self, ttl: Duration) -> bool {
        self.created_at.elapsed() > ttl
    }
}

/// TTL-bounded concurrent cache of compiled plans.
pub struct PlanCache {
    map: ConcurrentMap<u64, Arc<CachedPlan>>,
    ttl: Duration,
}

impl PlanCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            map: ConcurrentMap::new(),
            ttl,
        }
    }

    /// Finds a live plan. An expired entry is removed before reporting the
    /// miss, so the caller recompiles and re-inserts.
    pub fn lookup(&self, hash: u64) -> Option<Arc<CachedPlan>> {
        let accessor = self.map.access();
        let plan = accessor.find(&hash)?;
        if plan.is_expired(self.ttl) {
            accessor.remove(&hash);
            return None;
        }
        Some(plan)
    }

    /// Insert-if-absent; a racing insert keeps the first plan.
    pub fn insert(&self, hash: u64, plan: Arc<CachedPlan>) -> Arc<CachedPlan> {
        self.map.access().insert(hash, plan).0
    }

    /// Drops every entry, by iterating the accessor and removing each key.
    pub fn clear(&self) {
        let accessor = self.map.access();
        let mut dropped = 0usize;
        for (hash, _) in accessor.iter() {
            if accessor.remove(&hash) {
                dropped += 1;
            }
        }
        debug!(dropped, "plan cache invalidated");
    }

    pub fn len(&self) -> usize {
        self.map.access().iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Parse results shared across plans; consulted before the parser runs.
pub struct AstCache {
    map: ConcurrentMap<u64, Arc<AstStorage>>,
}

impl Default for AstCache {
    fn default() -> Self {
        Self::new()
    }
}

impl AstCache {
    pub fn new() -> Self {
        Self {
            map: ConcurrentMap::new(),
        }
    }

    pub fn lookup(&self, hash: u64) -> Option<Arc<AstStorage>> {
        self.map.access().find(&hash)
    }

    pub fn insert(&self, hash: u64, storage: Arc<AstStorage>) -> Arc<AstStorage> {
        self.map.access().insert(hash, storage).0
    }
}

#[cfg(test)]
mod tests {
    use std::thread::sleep;

    use super::*;
    use crate::query::symbols::SymbolTable;

    fn dummy_plan() -> Arc<CachedPlan> {
        Arc::new(CachedPlan::new(
            LogicalOperator::Once,
            1.0,
            SymbolTable::default(),
            AstStorage::default(),
        ))
    }

    #[test]
    fn lookup_within_ttl_hits() {
        let cache = PlanCache::new(Duration::from_secs(60));
        cache.insert(1, dummy_plan());
        assert!(cache.lookup(1).is_some());
    }

    #[test]
    fn expired_entry_is_removed_on_lookup() {
        let cache = PlanCache::new(Duration::from_millis(20));
        cache.insert(7, dummy_plan());
        assert!(cache.lookup(7).is_some());
        sleep(Duration::from_millis(40));
        assert!(cache.lookup(7).is_none());
        // The expired entry is gone from the map itself, not just masked.
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn racing_insert_keeps_first_plan() {
        let cache = PlanCache::new(Duration::from_secs(60));
        let first = cache.insert(3, dummy_plan());
        let winner = cache.insert(3, dummy_plan());
        assert!(Arc::ptr_eq(&first, &winner));
    }

    #[test]
    fn clear_empties_the_cache() {
        let cache = PlanCache::new(Duration::from_secs(60));
        for hash in 0..16 {
            cache.insert(hash, dummy_plan());
        }
        cache.clear();
        assert!(cache.is_empty());
    }
}
