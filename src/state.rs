use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Local};
use parking_lot::RwLock;
use thiserror::Error;
use tokio::sync::watch;

use crate::market::{AssetId, MarketSnapshot, PriceTable};

#[derive(Debug, Clone)]
pub struct AppState {
    pub prices: PriceTable,
    pub selected: AssetId,
    pub loading: bool,
    pub using_fallback: bool,
    pub last_updated: Option<DateTime<Local>>,
}

impl AppState {
    pub fn new(selected: AssetId) -> Self {
        Self {
            prices: PriceTable::default(),
            selected,
            loading: false,
            using_fallback: false,
            last_updated: None,
        }
    }

    /// Parsing step: overwrite what the snapshot carries and stamp the time,
    /// even when nothing changed.
    pub fn apply_snapshot(&mut self, snapshot: &MarketSnapshot, now: DateTime<Local>) -> usize {
        let updated = self.prices.apply_snapshot(snapshot);
        self.last_updated = Some(now);
        updated
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SelectError {
    #[error("unknown asset {0:?} (expected btc|eth|usdt)")]
    UnknownAsset(String),
}

/// Process-wide state handle. Cheap to clone.
///
/// The price table is written only by the fetcher's parsing step and read by
/// the view layer; the selection is written only by user input. Locks are
/// never held across an await point.
#[derive(Clone)]
pub struct SharedState {
    inner: Arc<RwLock<AppState>>,
    in_flight: Arc<AtomicBool>,
    revision: Arc<watch::Sender<u64>>,
}

impl SharedState {
    pub fn new(selected: AssetId) -> Self {
        let (tx, _rx) = watch::channel(0u64);
        Self {
            inner: Arc::new(RwLock::new(AppState::new(selected))),
            in_flight: Arc::new(AtomicBool::new(false)),
            revision: Arc::new(tx),
        }
    }

    pub fn snapshot(&self) -> AppState {
        self.inner.read().clone()
    }

    pub fn read<R>(&self, f: impl FnOnce(&AppState) -> R) -> R {
        f(&self.inner.read())
    }

    /// Runs a mutation and notifies subscribers afterwards.
    pub fn update<R>(&self, f: impl FnOnce(&mut AppState) -> R) -> R {
        let out = f(&mut self.inner.write());
        self.revision.send_modify(|r| *r = r.wrapping_add(1));
        out
    }

    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    pub fn revision(&self) -> u64 {
        *self.revision.borrow()
    }

    pub fn select(&self, raw: &str) -> Result<AssetId, SelectError> {
        let id = AssetId::parse(raw).ok_or_else(|| SelectError::UnknownAsset(raw.to_string()))?;
        self.update(|s| s.selected = id);
        Ok(id)
    }

    pub fn in_flight(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Claims the single in-flight slot. `None` if a fetch already holds it.
    /// Dropping the guard releases the slot and clears `loading`.
    pub fn try_begin_fetch(&self) -> Option<FetchGuard> {
        self.in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()?;
        self.update(|s| s.loading = true);
        Some(FetchGuard { state: self.clone() })
    }
}

pub struct FetchGuard {
    state: SharedState,
}

impl Drop for FetchGuard {
    fn drop(&mut self) {
        self.state.update(|s| s.loading = false);
        self.state.in_flight.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::demo_snapshot;

    #[test]
    fn guard_is_single_flight_and_releases_on_drop() {
        let st = SharedState::new(AssetId::Btc);
        let g = st.try_begin_fetch().expect("first claim");
        assert!(st.in_flight());
        assert!(st.snapshot().loading);
        assert!(st.try_begin_fetch().is_none());

        drop(g);
        assert!(!st.in_flight());
        assert!(!st.snapshot().loading);
        assert!(st.try_begin_fetch().is_some());
    }

    #[test]
    fn apply_stamps_time_even_without_changes() {
        let mut s = AppState::new(AssetId::Btc);
        assert!(s.last_updated.is_none());
        let empty = MarketSnapshot::default();
        let now = Local::now();
        assert_eq!(s.apply_snapshot(&empty, now), 0);
        assert_eq!(s.last_updated, Some(now));

        assert_eq!(s.apply_snapshot(&demo_snapshot(), now), 3);
    }

    #[test]
    fn select_changes_only_selection() {
        let st = SharedState::new(AssetId::Btc);
        st.update(|s| s.apply_snapshot(&demo_snapshot(), Local::now()));
        let before = st.snapshot();

        assert_eq!(st.select("eth"), Ok(AssetId::Eth));
        let after = st.snapshot();
        assert_eq!(after.selected, AssetId::Eth);
        for id in AssetId::ALL {
            assert_eq!(after.prices.price(id), before.prices.price(id));
        }
        assert_eq!(after.last_updated, before.last_updated);

        assert_eq!(
            st.select("doge"),
            Err(SelectError::UnknownAsset("doge".to_string()))
        );
        assert_eq!(st.snapshot().selected, AssetId::Eth);
    }

    #[test]
    fn updates_bump_revision() {
        let st = SharedState::new(AssetId::Btc);
        let rx = st.subscribe();
        let start = *rx.borrow();
        st.select("usdt").unwrap();
        assert!(*rx.borrow() > start);
        assert_eq!(st.revision(), *rx.borrow());
    }
}
