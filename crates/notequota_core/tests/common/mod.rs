#![allow(dead_code)]

use notequota_core::{
    Clock, EngineConfig, EngineContext, Limit, ManualClock, MemoryObjectStore, ObjectStore,
    TierPolicy,
};
use std::collections::BTreeSet;
use std::sync::Arc;

pub struct Harness {
    pub ctx: EngineContext,
    pub store: Arc<MemoryObjectStore>,
    pub clock: Arc<ManualClock>,
}

pub fn harness(config: EngineConfig) -> Harness {
    let clock = Arc::new(ManualClock::new(1_000_000));
    let store = Arc::new(MemoryObjectStore::with_clock(
        Arc::clone(&clock) as Arc<dyn Clock>
    ));
    let ctx = EngineContext::with_clock(
        config,
        Arc::clone(&store) as Arc<dyn ObjectStore>,
        Arc::clone(&clock) as Arc<dyn Clock>,
    )
    .unwrap();
    Harness { ctx, store, clock }
}

impl Harness {
    /// Moves the clock so every object written so far counts as an orphan
    /// candidate.
    pub fn age_objects_past_orphan_window(&self) {
        self.clock.advance(self.ctx.config().min_orphan_age_ms);
    }
}

pub fn default_harness() -> Harness {
    harness(EngineConfig::default())
}

pub fn tier(name: &str, modules: Limit, notes: Limit, storage: Limit) -> TierPolicy {
    TierPolicy {
        name: name.to_string(),
        max_modules: modules,
        max_notes_per_module: notes,
        max_storage_bytes: storage,
        features: BTreeSet::new(),
    }
}

/// Config with one small tier for boundary tests plus the unlimited `pro`.
pub fn small_config() -> EngineConfig {
    EngineConfig {
        tiers: vec![
            tier(
                "small",
                Limit::Bounded(2),
                Limit::Bounded(3),
                Limit::Bounded(10_000),
            ),
            tier("pro", Limit::Unlimited, Limit::Unlimited, Limit::Unlimited),
        ],
        default_tier: "small".to_string(),
        absolute_file_size_ceiling_bytes: 4_000,
        ..EngineConfig::default()
    }
}
