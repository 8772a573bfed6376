//! Fixed-window counters per (principal, scope).

use crate::throttle::registry::RateLimit;
use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// One scope to charge, with the limit already adjusted for the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopeCheck {
    pub scope: String,
    pub limit: RateLimit,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// `remaining` is the smallest quota left across the charged scopes.
    Admitted { remaining: u32 },
    Exceeded { scope: String, retry_after: Duration },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowPhase {
    Fresh,
    WithinLimit,
    Exceeded,
}

#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Charge `checks` in order for `principal`, stopping at the first scope
    /// that is already at its limit. The whole sequence is atomic.
    async fn hit(&self, principal: &str, checks: &[ScopeCheck]) -> Result<Verdict>;

    /// Drop windows that have elapsed. Returns how many were removed.
    async fn purge_expired(&self) -> Result<usize>;
}

#[derive(Debug, Clone, Copy)]
struct WindowState {
    started: Instant,
    length: Duration,
    count: u32,
}

impl WindowState {
    fn new(now: Instant, length: Duration) -> Self {
        Self {
            started: now,
            length,
            count: 0,
        }
    }

    fn elapsed(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.started) >= self.length
    }

    fn phase(&self, limit: u32) -> WindowPhase {
        if self.count >= limit {
            WindowPhase::Exceeded
        } else if self.count == 0 {
            WindowPhase::Fresh
        } else {
            WindowPhase::WithinLimit
        }
    }

    fn retry_after(&self, now: Instant) -> Duration {
        (self.started + self.length).saturating_duration_since(now)
    }
}

/// In-process counter table behind a single mutex.
#[derive(Default)]
pub struct MemoryCounterStore {
    windows: Mutex<HashMap<(String, String), WindowState>>,
}

impl MemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn hit_at(&self, principal: &str, checks: &[ScopeCheck], now: Instant) -> Verdict {
        let mut windows = self.windows.lock();
        let mut remaining = u32::MAX;

        for check in checks {
            let length = check.limit.window.duration();
            let state = windows
                .entry((principal.to_string(), check.scope.clone()))
                .or_insert_with(|| WindowState::new(now, length));

            if state.elapsed(now) || state.length != length {
                *state = WindowState::new(now, length);
            }

            // A full window is not charged again; neither are the scopes after it.
            if state.phase(check.limit.count) == WindowPhase::Exceeded {
                return Verdict::Exceeded {
                    scope: check.scope.clone(),
                    retry_after: state.retry_after(now),
                };
            }

            state.count += 1;
            remaining = remaining.min(check.limit.count - state.count);
        }

        Verdict::Admitted {
            remaining: if checks.is_empty() { 0 } else { remaining },
        }
    }

    pub fn purge_expired_at(&self, now: Instant) -> usize {
        let mut windows = self.windows.lock();
        let before = windows.len();
        windows.retain(|_, state| !state.elapsed(now));
        before - windows.len()
    }

    pub fn phase_at(&self, principal: &str, check: &ScopeCheck, now: Instant) -> WindowPhase {
        let windows = self.windows.lock();
        match windows.get(&(principal.to_string(), check.scope.clone())) {
            Some(state) if !state.elapsed(now) => state.phase(check.limit.count),
            _ => WindowPhase::Fresh,
        }
    }

    pub fn len(&self) -> usize {
        self.windows.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn hit(&self, principal: &str, checks: &[ScopeCheck]) -> Result<Verdict> {
        Ok(self.hit_at(principal, checks, Instant::now()))
    }

    async fn purge_expired(&self) -> Result<usize> {
        Ok(self.purge_expired_at(Instant::now()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::throttle::registry::Window;
    use std::sync::Arc;

    fn check(scope: &str, count: u32, window: Window) -> ScopeCheck {
        ScopeCheck {
            scope: scope.to_string(),
            limit: RateLimit::new(count, window),
        }
    }

    #[test]
    fn test_admits_up_to_limit_then_rejects() {
        let store = MemoryCounterStore::new();
        let login = [check("login", 10, Window::Minute)];
        let now = Instant::now();

        for i in 0..10 {
            assert_eq!(
                store.hit_at("ip:1.2.3.4", &login, now),
                Verdict::Admitted { remaining: 9 - i }
            );
        }

        match store.hit_at("ip:1.2.3.4", &login, now + Duration::from_secs(15)) {
            Verdict::Exceeded { scope, retry_after } => {
                assert_eq!(scope, "login");
                assert!(retry_after <= Duration::from_secs(60));
                assert_eq!(retry_after, Duration::from_secs(45));
            }
            other => panic!("expected rejection, got {:?}", other),
        }
    }

    #[test]
    fn test_window_resets_after_elapsing() {
        let store = MemoryCounterStore::new();
        let scope = [check("register", 2, Window::Minute)];
        let start = Instant::now();

        assert_eq!(store.phase_at("k", &scope[0], start), WindowPhase::Fresh);
        store.hit_at("k", &scope, start);
        assert_eq!(store.phase_at("k", &scope[0], start), WindowPhase::WithinLimit);
        store.hit_at("k", &scope, start);
        assert_eq!(store.phase_at("k", &scope[0], start), WindowPhase::Exceeded);
        assert!(matches!(
            store.hit_at("k", &scope, start),
            Verdict::Exceeded { .. }
        ));

        let later = start + Duration::from_secs(60);
        assert_eq!(store.phase_at("k", &scope[0], later), WindowPhase::Fresh);
        assert_eq!(
            store.hit_at("k", &scope, later),
            Verdict::Admitted { remaining: 1 }
        );
    }

    #[test]
    fn test_principals_counted_separately() {
        let store = MemoryCounterStore::new();
        let scope = [check("login", 1, Window::Minute)];
        let now = Instant::now();

        assert!(matches!(store.hit_at("a", &scope, now), Verdict::Admitted { .. }));
        assert!(matches!(store.hit_at("b", &scope, now), Verdict::Admitted { .. }));
        assert!(matches!(store.hit_at("a", &scope, now), Verdict::Exceeded { .. }));
    }

    #[test]
    fn test_short_circuit_leaves_later_scopes_uncharged() {
        let store = MemoryCounterStore::new();
        let now = Instant::now();
        let login = check("login", 1, Window::Minute);
        let burst = check("burst", 60, Window::Minute);
        let both = [login.clone(), burst.clone()];

        assert_eq!(
            store.hit_at("k", &both, now),
            Verdict::Admitted { remaining: 0 }
        );
        for _ in 0..5 {
            assert!(matches!(
                store.hit_at("k", &both, now),
                Verdict::Exceeded { ref scope, .. } if scope == "login"
            ));
        }

        // burst saw only the one admitted request
        assert_eq!(
            store.hit_at("k", &[burst], now),
            Verdict::Admitted { remaining: 58 }
        );
    }

    #[test]
    fn test_remaining_is_minimum_across_scopes() {
        let store = MemoryCounterStore::new();
        let checks = [
            check("task_create", 100, Window::Minute),
            check("burst", 60, Window::Minute),
        ];
        assert_eq!(
            store.hit_at("k", &checks, Instant::now()),
            Verdict::Admitted { remaining: 59 }
        );
    }

    #[test]
    fn test_purge_drops_only_elapsed_windows() {
        let store = MemoryCounterStore::new();
        let now = Instant::now();
        store.hit_at("k", &[check("login", 10, Window::Minute)], now);
        store.hit_at("k", &[check("admin_action", 10, Window::Hour)], now);
        assert_eq!(store.len(), 2);

        assert_eq!(store.purge_expired_at(now + Duration::from_secs(61)), 1);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_hits_admit_exactly_limit() {
        let store = Arc::new(MemoryCounterStore::new());
        let checks = Arc::new(vec![check("task_update", 200, Window::Minute)]);

        let attempts = (0..500).map(|_| {
            let store = store.clone();
            let checks = checks.clone();
            tokio::spawn(async move { store.hit("user:42", &checks).await.unwrap() })
        });
        let results = futures_util::future::join_all(attempts).await;

        let admitted = results
            .into_iter()
            .filter(|r| matches!(r.as_ref().unwrap(), Verdict::Admitted { .. }))
            .count();
        assert_eq!(admitted, 200);
    }
}
