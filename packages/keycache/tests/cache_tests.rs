mod common;

use std::error::Error;
use std::sync::Arc;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use keycache::{
    AutoLockConfig, KeyCache, MemoryProbe, MemorySnapshot, MemoryWiper, SecretError, SecretEvent,
    StopReason, WipeConfig,
};

#[test]
fn test_waiters_block_until_secret_is_set() -> Result<(), Box<dyn Error>> {
    let cache = KeyCache::new(AutoLockConfig::disabled());
    let (tx, rx) = mpsc::channel();

    for _ in 0..3 {
        let cache = cache.clone();
        let tx = tx.clone();
        thread::spawn(move || {
            let _ = tx.send(cache.get_secret());
        });
    }

    assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
    assert!(cache.is_locked());

    let published = cache.set_secret(common::secret(1));
    for _ in 0..3 {
        let received = rx.recv_timeout(Duration::from_secs(5))?;
        assert!(Arc::ptr_eq(&received, &published));
    }

    assert!(cache.clear());
    assert!(cache.is_locked());
    assert!(cache.get_secret_timeout(Duration::from_millis(50)).is_none());
    Ok(())
}

#[test]
fn test_clear_destroys_secret_once() {
    let cache = KeyCache::new(AutoLockConfig::disabled());
    let held = cache.set_secret(common::secret(2));

    assert!(cache.clear());
    assert!(!cache.clear());

    assert!(held.is_destroyed());
    assert_eq!(
        held.encryption_key().with_material(|key| key.len()),
        Err(SecretError::Destroyed("AES"))
    );
}

#[test]
fn test_replacing_secret_destroys_previous() {
    let cache = KeyCache::new(AutoLockConfig::disabled());
    let first = cache.set_secret(common::secret(3));
    let second = cache.set_secret(common::secret(4));

    assert!(first.is_destroyed());
    assert!(!second.is_destroyed());
    assert!(cache.try_get_secret().is_some_and(|s| Arc::ptr_eq(&s, &second)));
}

#[tokio::test]
async fn test_events_follow_transitions() -> Result<(), Box<dyn Error>> {
    let cache = KeyCache::new(AutoLockConfig::disabled());
    let mut events = cache.subscribe();

    cache.set_secret(common::secret(5));
    cache.clear();
    cache.clear();

    assert_eq!(events.recv().await?, SecretEvent::Available);
    assert_eq!(events.recv().await?, SecretEvent::Cleared);
    assert!(events.try_recv().is_err());
    Ok(())
}

#[test]
fn test_cleared_event_follows_destroy() -> Result<(), Box<dyn Error>> {
    let cache = KeyCache::new(AutoLockConfig::disabled());
    let held = cache.set_secret(common::secret(11));
    let mut events = cache.subscribe();

    let listener = {
        let held = held.clone();
        thread::spawn(move || match events.blocking_recv() {
            Ok(SecretEvent::Cleared) => Some(held.is_destroyed()),
            _ => None,
        })
    };

    assert!(cache.clear());
    let destroyed_on_receipt = listener.join().map_err(|_| "listener panicked")?;
    assert_eq!(destroyed_on_receipt, Some(true));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_auto_lock_after_timeout_in_background() -> Result<(), Box<dyn Error>> {
    let cache = KeyCache::new(AutoLockConfig::after(Duration::from_secs(120)));
    let mut events = cache.subscribe();
    cache.set_secret(common::secret(6));
    assert_eq!(events.recv().await?, SecretEvent::Available);

    cache.on_app_backgrounded();
    tokio::time::sleep(Duration::from_secs(119)).await;
    assert!(!cache.is_locked());

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert!(cache.is_locked());
    assert_eq!(events.recv().await?, SecretEvent::Cleared);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_foreground_cancels_auto_lock() {
    let cache = KeyCache::new(AutoLockConfig::after(Duration::from_secs(60)));
    cache.set_secret(common::secret(7));

    cache.on_app_backgrounded();
    tokio::time::sleep(Duration::from_secs(30)).await;
    cache.on_app_foregrounded();
    tokio::time::sleep(Duration::from_secs(300)).await;
    assert!(!cache.is_locked());

    // Going back to the background starts a fresh countdown.
    cache.on_app_backgrounded();
    tokio::time::sleep(Duration::from_secs(59)).await;
    assert!(!cache.is_locked());
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert!(cache.is_locked());
}

#[tokio::test(start_paused = true)]
async fn test_short_timeouts_are_clamped() {
    let cache = KeyCache::new(AutoLockConfig::after(Duration::from_secs(5)));
    cache.set_secret(common::secret(8));
    cache.on_app_backgrounded();

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert!(!cache.is_locked());
    tokio::time::sleep(Duration::from_secs(31)).await;
    assert!(cache.is_locked());
}

#[tokio::test(start_paused = true)]
async fn test_disabled_auto_lock_never_fires() {
    let cache = KeyCache::new(AutoLockConfig::disabled());
    cache.set_secret(common::secret(9));
    cache.on_app_backgrounded();

    tokio::time::sleep(Duration::from_secs(3600)).await;
    assert!(!cache.is_locked());
}

struct AmpleMemory;

impl MemoryProbe for AmpleMemory {
    fn snapshot(&self) -> MemorySnapshot {
        MemorySnapshot {
            total: 8 << 30,
            available: 4 << 30,
        }
    }
}

#[test]
fn test_clear_starts_memory_wipe() {
    let config = WipeConfig::default()
        .with_page_size(512)
        .with_pages_per_block(8)
        .with_max_total_bytes(64 * 1024);
    let wiper = Arc::new(MemoryWiper::with_probe(config, Arc::new(AmpleMemory)));
    let cache = KeyCache::with_memory_wiper(AutoLockConfig::disabled(), wiper.clone());

    // Nothing to evict while locked.
    assert!(!cache.clear());
    assert!(wiper.wait().is_none());

    cache.set_secret(common::secret(10));
    assert!(cache.clear());

    let report = wiper.wait();
    assert_eq!(report.map(|r| r.reason), Some(StopReason::Limit));
    assert_eq!(report.map(|r| r.wiped_bytes), Some(64 * 1024));
}
