//! Master secret lifecycle for background work.
//!
//! - `KeyCache` holds the unlocked secret, blocks waiters until one is
//!   published and locks again on demand or after an inactivity timeout
//! - `MemoryWiper` overwrites freed memory after a lock
//! - `SecretRequirement` and `WithSecret` let queued jobs wait for an unlock

mod cache;
mod job;
mod requirement;
mod secret;
mod wipe;

pub use cache::{AutoLockConfig, KeyCache, MIN_AUTO_LOCK_TIMEOUT, SecretEvent};
pub use job::{SecretJob, WithSecret};
pub use requirement::{SecretRequirement, register_secret_requirement};
pub use secret::{MasterSecret, SecretError, SecretKey};
pub use wipe::{
    MemoryProbe, MemorySnapshot, MemoryWiper, PressureLevel, StopReason, SystemMemoryProbe,
    WipeConfig, WipeReport,
};
