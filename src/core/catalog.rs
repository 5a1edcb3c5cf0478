use crate::core::models::{App, AppId};
use chrono::{DateTime, Utc};
use std::collections::HashMap;

/// Point-in-time snapshot of the remote library.
///
/// A `Catalog` is an immutable value: each successful refresh produces a new
/// one that fully supersedes the previous snapshot (apps missing from the new
/// snapshot are gone, no partial merge). Lookup is by id; iteration follows a
/// fixed ascending-id ordering so "next app to idle" is deterministic.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Catalog {
    apps: HashMap<AppId, App>,
    order: Vec<AppId>,
    fetched_at: Option<DateTime<Utc>>,
}

impl Catalog {
    pub fn from_apps(apps: HashMap<AppId, App>) -> Self {
        let mut order: Vec<AppId> = apps.keys().copied().collect();
        order.sort_unstable();
        Self {
            apps,
            order,
            fetched_at: Some(Utc::now()),
        }
    }

    pub fn get(&self, id: AppId) -> Option<&App> {
        self.apps.get(&id)
    }

    pub fn len(&self) -> usize {
        self.apps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.apps.is_empty()
    }

    pub fn fetched_at(&self) -> Option<DateTime<Utc>> {
        self.fetched_at
    }

    /// Apps in the fixed catalog ordering.
    pub fn iter(&self) -> impl Iterator<Item = &App> {
        self.order.iter().filter_map(|id| self.apps.get(id))
    }

    /// Next app with remaining drops after `after` in catalog order,
    /// wrapping around to the start. `after` itself is skipped, so idling
    /// cycles through the whole catalog instead of stopping at the last
    /// entry. `after = 0` starts the search from the beginning.
    pub fn next_eligible(&self, after: AppId) -> Option<&App> {
        let start = self
            .order
            .iter()
            .position(|&id| id == after)
            .map(|pos| pos + 1)
            .unwrap_or(0);

        self.order
            .iter()
            .cycle()
            .skip(start)
            .take(self.order.len())
            .filter_map(|id| self.apps.get(id))
            .find(|app| app.id != after && app.idle_eligible())
    }

    /// All refund-eligible apps in the fixed ordering, for seeding a
    /// multi-idle session.
    pub fn refund_candidates(&self) -> Vec<App> {
        self.iter().filter(|a| a.refund_eligible()).cloned().collect()
    }

    pub fn games_to_idle(&self) -> usize {
        self.iter().filter(|a| a.idle_eligible()).count()
    }

    pub fn games_in_refund(&self) -> usize {
        self.iter().filter(|a| a.refund_eligible()).count()
    }

    pub fn total_remaining_drops(&self) -> u64 {
        self.iter().map(|a| u64::from(a.remaining_drops)).sum()
    }
}
