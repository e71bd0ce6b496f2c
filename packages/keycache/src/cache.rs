//! Process-wide cache of the unlocked master secret.

use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tokio::sync::broadcast;
use tokio::task::AbortHandle;
use tracing::{debug, error, info, warn};

use crate::secret::MasterSecret;
use crate::wipe::MemoryWiper;

/// Shortest inactivity timeout the auto-lock accepts.
pub const MIN_AUTO_LOCK_TIMEOUT: Duration = Duration::from_secs(60);

/// Notifications about the cached secret.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecretEvent {
    /// A secret was published.
    Available,
    /// The secret was cleared and destroyed.
    Cleared,
}

/// Inactivity auto-lock settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AutoLockConfig {
    pub enabled: bool,
    pub timeout: Duration,
}

impl Default for AutoLockConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            timeout: Duration::from_secs(5 * 60),
        }
    }
}

impl AutoLockConfig {
    /// Lock after `timeout` in the background, never sooner than a minute.
    pub fn after(timeout: Duration) -> Self {
        Self {
            enabled: true,
            timeout: timeout.max(MIN_AUTO_LOCK_TIMEOUT),
        }
    }

    pub fn disabled() -> Self {
        Self::default()
    }

    /// The timeout to arm, if the auto-lock is on.
    pub fn effective_timeout(&self) -> Option<Duration> {
        self.enabled
            .then(|| self.timeout.max(MIN_AUTO_LOCK_TIMEOUT))
    }
}

struct AutoLockTimer {
    generation: u64,
    handle: AbortHandle,
}

struct CacheState {
    secret: Option<Arc<MasterSecret>>,
    app_visible: bool,
    auto_lock: AutoLockConfig,
    timer: Option<AutoLockTimer>,
    generation: u64,
}

/// Holds the master secret while the app is unlocked.
///
/// The cache is either empty (locked) or holds one secret. Waiters in
/// [`KeyCache::get_secret`] block until a secret is published. Clearing
/// destroys the secret and, if configured, starts a memory wipe.
pub struct KeyCache {
    state: Mutex<CacheState>,
    available: Condvar,
    events: broadcast::Sender<SecretEvent>,
    wiper: Option<Arc<MemoryWiper>>,
    myself: Weak<KeyCache>,
}

impl KeyCache {
    pub fn new(auto_lock: AutoLockConfig) -> Arc<Self> {
        Self::build(auto_lock, None)
    }

    /// Create a cache that wipes memory after every clear.
    pub fn with_memory_wiper(auto_lock: AutoLockConfig, wiper: Arc<MemoryWiper>) -> Arc<Self> {
        Self::build(auto_lock, Some(wiper))
    }

    fn build(auto_lock: AutoLockConfig, wiper: Option<Arc<MemoryWiper>>) -> Arc<Self> {
        let (events, _) = broadcast::channel(16);
        Arc::new_cyclic(|myself| Self {
            state: Mutex::new(CacheState {
                secret: None,
                app_visible: true,
                auto_lock,
                timer: None,
                generation: 0,
            }),
            available: Condvar::new(),
            events,
            wiper,
            myself: myself.clone(),
        })
    }

    /// Publish a secret and release every blocked waiter.
    ///
    /// A secret already in the cache is destroyed and replaced.
    pub fn set_secret(&self, secret: MasterSecret) -> Arc<MasterSecret> {
        let secret = Arc::new(secret);
        let previous = {
            let mut state = self.state.lock();
            let previous = state.secret.replace(secret.clone());
            self.available.notify_all();
            self.arm_timer(&mut state);
            previous
        };

        if let Some(previous) = previous {
            if let Err(e) = previous.destroy() {
                error!("Failed to destroy replaced secret: {}", e);
            }
        }

        info!("Secret available");
        let _ = self.events.send(SecretEvent::Available);
        secret
    }

    /// Block the calling thread until a secret is available.
    ///
    /// Never call this from async tasks or the job scheduling path; use
    /// [`KeyCache::try_get_secret`] there.
    pub fn get_secret(&self) -> Arc<MasterSecret> {
        let mut state = self.state.lock();
        loop {
            if let Some(secret) = &state.secret {
                return secret.clone();
            }
            self.available.wait(&mut state);
        }
    }

    /// Like [`KeyCache::get_secret`], giving up after `timeout`.
    pub fn get_secret_timeout(&self, timeout: Duration) -> Option<Arc<MasterSecret>> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        loop {
            if let Some(secret) = &state.secret {
                return Some(secret.clone());
            }
            if self.available.wait_until(&mut state, deadline).timed_out() {
                return state.secret.clone();
            }
        }
    }

    pub fn try_get_secret(&self) -> Option<Arc<MasterSecret>> {
        self.state.lock().secret.clone()
    }

    pub fn is_locked(&self) -> bool {
        self.state.lock().secret.is_none()
    }

    /// Drop and destroy the secret. Returns false if already locked.
    pub fn clear(&self) -> bool {
        self.clear_if(|_| true)
    }

    fn clear_if(&self, matches: impl FnOnce(&CacheState) -> bool) -> bool {
        let secret = {
            let mut state = self.state.lock();
            if !matches(&state) {
                return false;
            }
            cancel_timer(&mut state);
            state.secret.take()
        };

        let Some(secret) = secret else {
            debug!("Clear requested while already locked");
            return false;
        };

        if let Err(e) = secret.destroy() {
            error!("Failed to destroy secret: {}", e);
        }
        info!("Secret cleared");
        let _ = self.events.send(SecretEvent::Cleared);

        if let Some(wiper) = &self.wiper {
            wiper.evict_on_lock();
        }
        true
    }

    pub fn on_app_foregrounded(&self) {
        let mut state = self.state.lock();
        state.app_visible = true;
        cancel_timer(&mut state);
    }

    pub fn on_app_backgrounded(&self) {
        let mut state = self.state.lock();
        state.app_visible = false;
        self.arm_timer(&mut state);
    }

    pub fn set_auto_lock(&self, auto_lock: AutoLockConfig) {
        let mut state = self.state.lock();
        state.auto_lock = auto_lock;
        self.arm_timer(&mut state);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SecretEvent> {
        self.events.subscribe()
    }

    /// (Re)start the auto-lock countdown if the app is hidden and unlocked.
    fn arm_timer(&self, state: &mut CacheState) {
        cancel_timer(state);

        if state.app_visible || state.secret.is_none() {
            return;
        }
        let Some(timeout) = state.auto_lock.effective_timeout() else {
            return;
        };
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("No async runtime; auto-lock not armed");
            return;
        };

        state.generation += 1;
        let generation = state.generation;
        let cache = self.myself.clone();
        let task = runtime.spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(cache) = cache.upgrade() {
                cache.expire(generation);
            }
        });

        debug!("Auto-lock armed for {:?}", timeout);
        state.timer = Some(AutoLockTimer {
            generation,
            handle: task.abort_handle(),
        });
    }

    fn expire(&self, generation: u64) {
        let cleared = self.clear_if(|state| {
            state
                .timer
                .as_ref()
                .is_some_and(|timer| timer.generation == generation)
        });
        if cleared {
            info!("Auto-lock timeout elapsed");
        }
    }
}

fn cancel_timer(state: &mut CacheState) {
    if let Some(timer) = state.timer.take() {
        timer.handle.abort();
    }
}
