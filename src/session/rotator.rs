//! Session rotation
//!
//! The rotator owns the single active session shared by every worker. The
//! active session sits behind an `RwLock<Arc<_>>`: readers clone the `Arc`
//! and keep a consistent identity for the whole request, while rotation
//! swaps the pointer in one step.

use crate::config::IdentityConfig;
use crate::session::identity::{IdentityPool, SessionState};
use reqwest::header::HeaderMap;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

/// Sliding window over the most recent request outcomes
///
/// Counts transient and block signals; once the count inside the window
/// reaches the threshold the caller should rotate proactively.
#[derive(Debug)]
pub struct BlockWindow {
    outcomes: VecDeque<bool>,
    size: usize,
    threshold: usize,
}

impl BlockWindow {
    pub fn new(size: usize, threshold: usize) -> Self {
        Self {
            outcomes: VecDeque::with_capacity(size),
            size: size.max(1),
            threshold: threshold.max(1),
        }
    }

    /// Records one outcome; returns true when the threshold is reached
    ///
    /// The window is cleared when it fires so one burst triggers one rotation.
    pub fn record(&mut self, blocked: bool) -> bool {
        if self.outcomes.len() == self.size {
            self.outcomes.pop_front();
        }
        self.outcomes.push_back(blocked);

        if self.signals() >= self.threshold {
            self.outcomes.clear();
            return true;
        }
        false
    }

    pub fn signals(&self) -> usize {
        self.outcomes.iter().filter(|b| **b).count()
    }

    pub fn clear(&mut self) {
        self.outcomes.clear();
    }
}

/// Supplies request identities and replaces them on demand
#[derive(Debug)]
pub struct SessionRotator {
    pool: IdentityPool,
    active: RwLock<Arc<SessionState>>,
    window: Mutex<BlockWindow>,
    requests: AtomicU64,
    rotations: AtomicU64,
    rotate_every: u64,
}

impl SessionRotator {
    pub fn new(config: &IdentityConfig) -> Self {
        let pool = IdentityPool::from_config(config);
        let first = SessionState::new(pool.draw(None), 0);

        Self {
            pool,
            active: RwLock::new(Arc::new(first)),
            window: Mutex::new(BlockWindow::new(
                config.block_window,
                config.block_threshold,
            )),
            requests: AtomicU64::new(0),
            rotations: AtomicU64::new(0),
            rotate_every: config.rotate_every.max(1),
        }
    }

    /// The session currently in effect
    pub fn current(&self) -> Arc<SessionState> {
        let guard = self.active.read().unwrap_or_else(|e| e.into_inner());
        Arc::clone(&guard)
    }

    /// Headers of the session currently in effect
    pub fn current_headers(&self) -> HeaderMap {
        self.current().headers()
    }

    /// Discards the active session and installs a fresh one
    ///
    /// The new session gets a different user agent and an empty cookie jar.
    pub fn rotate(&self) -> Arc<SessionState> {
        let mut guard = self.active.write().unwrap_or_else(|e| e.into_inner());
        self.swap_locked(&mut guard)
    }

    /// Rotates only if `generation` is still the active one
    ///
    /// Several workers can see the same block at once; only the first of
    /// them replaces the session. Returns true if this call rotated.
    pub fn rotate_from(&self, generation: u64) -> bool {
        let mut guard = self.active.write().unwrap_or_else(|e| e.into_inner());
        if guard.generation != generation {
            return false;
        }
        self.swap_locked(&mut guard);
        true
    }

    fn swap_locked(&self, active: &mut Arc<SessionState>) -> Arc<SessionState> {
        let identity = self.pool.draw(Some(active.identity.user_agent.as_str()));
        let next = Arc::new(SessionState::new(identity, active.generation + 1));

        tracing::info!(
            generation = next.generation,
            fingerprint = %next.identity.fingerprint,
            "Rotating session identity"
        );

        *active = Arc::clone(&next);
        self.rotations.fetch_add(1, Ordering::Relaxed);
        self.window
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
        next
    }

    /// Counts one outgoing request and returns the session to use for it
    ///
    /// Every `rotate-every` requests the identity is replaced to limit how
    /// long a single fingerprint stays exposed.
    pub fn begin_request(&self) -> Arc<SessionState> {
        let count = self.requests.fetch_add(1, Ordering::Relaxed) + 1;
        if count % self.rotate_every == 0 {
            tracing::debug!("Periodic rotation after {} requests", count);
            return self.rotate();
        }
        self.current()
    }

    /// Feeds one request outcome into the block window
    ///
    /// Returns true when enough transient or block signals accumulated to
    /// warrant a proactive rotation.
    pub fn record_outcome(&self, blocked: bool) -> bool {
        self.window
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .record(blocked)
    }

    pub fn rotations(&self) -> u64 {
        self.rotations.load(Ordering::Relaxed)
    }

    pub fn requests(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::cookie::CookieStore;
    use url::Url;

    fn rotator() -> SessionRotator {
        SessionRotator::new(&IdentityConfig::default())
    }

    #[test]
    fn test_block_window_threshold() {
        let mut window = BlockWindow::new(5, 3);
        assert!(!window.record(true));
        assert!(!window.record(false));
        assert!(!window.record(true));
        assert!(window.record(true));
        // Cleared after firing
        assert_eq!(window.signals(), 0);
    }

    #[test]
    fn test_block_window_slides() {
        let mut window = BlockWindow::new(3, 3);
        assert!(!window.record(true));
        assert!(!window.record(true));
        assert!(!window.record(false));
        // The first signal has slid out of the window
        assert!(!window.record(true));
        assert_eq!(window.signals(), 2);
    }

    #[test]
    fn test_rotate_changes_user_agent_and_cookies() {
        let rotator = rotator();
        let url = Url::parse("https://youcontrol.com.ua/").unwrap();

        let before = rotator.current();
        before.cookies.add_cookie_str("cf_clearance=abc", &url);
        assert!(before.cookies.cookies(&url).is_some());

        let after = rotator.rotate();

        assert_ne!(after.identity.user_agent, before.identity.user_agent);
        assert_eq!(after.generation, before.generation + 1);
        assert!(after.cookies.cookies(&url).is_none());
        assert_eq!(rotator.current().generation, after.generation);
        assert_eq!(rotator.rotations(), 1);
    }

    #[test]
    fn test_rotate_from_only_rotates_once_per_generation() {
        let rotator = rotator();
        let generation = rotator.current().generation;

        assert!(rotator.rotate_from(generation));
        assert!(!rotator.rotate_from(generation));
        assert_eq!(rotator.rotations(), 1);
    }

    #[test]
    fn test_periodic_rotation() {
        let config = IdentityConfig {
            rotate_every: 3,
            ..IdentityConfig::default()
        };
        let rotator = SessionRotator::new(&config);

        rotator.begin_request();
        rotator.begin_request();
        assert_eq!(rotator.rotations(), 0);
        let third = rotator.begin_request();
        assert_eq!(rotator.rotations(), 1);
        assert_eq!(third.generation, 1);
        assert_eq!(rotator.requests(), 3);
    }

    #[test]
    fn test_concurrent_readers_see_whole_sessions() {
        let rotator = Arc::new(rotator());
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let rotator = Arc::clone(&rotator);
                std::thread::spawn(move || {
                    for _ in 0..200 {
                        if i == 0 {
                            rotator.rotate();
                        }
                        let session = rotator.current();
                        let headers = session.headers();
                        assert_eq!(
                            headers
                                .get(reqwest::header::USER_AGENT)
                                .unwrap()
                                .to_str()
                                .unwrap(),
                            session.identity.user_agent
                        );
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(rotator.rotations(), 200);
    }
}
