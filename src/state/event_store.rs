use std::collections::HashSet;
use std::sync::{Arc, RwLock};

use dashmap::DashMap;

use crate::types::Event;

// ---------------------------------------------------------------------------
// EventStore
// ---------------------------------------------------------------------------

/// Deduplicated, ordered event_id → Event map.
///
/// Records are only ever replaced by re-ingestion, never deleted. `list()`
/// returns events in the order their ids were first seen.
pub struct EventStore {
    /// event_id → Event
    events: DashMap<String, Event>,
    /// event_ids in first-seen order
    order: RwLock<Vec<String>>,
}

impl EventStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Ingest one batch. Within the batch the first occurrence of an id wins;
    /// across batches the newer record replaces the stored one.
    /// Returns the deduplicated batch in input order.
    pub fn upsert(&self, batch: Vec<Event>) -> Vec<Event> {
        let accepted = Self::dedup(batch);

        let mut order = self.order.write().unwrap_or_else(|e| e.into_inner());
        for event in &accepted {
            if self.events.insert(event.event_id.clone(), event.clone()).is_none() {
                order.push(event.event_id.clone());
            }
        }

        accepted
    }

    /// Drop repeated ids from a batch, keeping the first occurrence.
    pub fn dedup(batch: Vec<Event>) -> Vec<Event> {
        let mut seen: HashSet<String> = HashSet::with_capacity(batch.len());
        batch
            .into_iter()
            .filter(|event| seen.insert(event.event_id.clone()))
            .collect()
    }

    pub fn get(&self, event_id: &str) -> Option<Event> {
        self.events.get(event_id).map(|e| e.clone())
    }

    pub fn list(&self) -> Vec<Event> {
        let order = self.order.read().unwrap_or_else(|e| e.into_inner());
        order.iter().filter_map(|id| self.get(id)).collect()
    }

    /// Overwrite an event's probability (clamped) and optionally its base.
    /// Returns the previous probability, or None if the event is unknown.
    pub fn set_probability(&self, event_id: &str, probability: f64, base: Option<f64>) -> Option<f64> {
        let mut event = self.events.get_mut(event_id)?;
        let old = event.probability;
        event.set_probability(probability);
        if base.is_some() {
            event.base_probability = base;
        }
        Some(old)
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

impl Default for EventStore {
    fn default() -> Self {
        Self {
            events: DashMap::new(),
            order: RwLock::new(Vec::new()),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
