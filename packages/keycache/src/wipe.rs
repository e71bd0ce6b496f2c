//! Best-effort eviction of freed secrets from process memory.
//!
//! After a lock the old key bytes are zeroed, but copies may linger in pages
//! the allocator has already released. The wiper claims as much memory as it
//! safely can, overwrites every page with random data, then releases it.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;
use rand::RngCore;
use sysinfo::System;
use tracing::{debug, info, warn};

/// Memory pressure reported by the platform, least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PressureLevel {
    RunningModerate,
    RunningLow,
    RunningCritical,
    UiHidden,
    Background,
    Moderate,
    Complete,
}

/// Point-in-time memory figures, in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemorySnapshot {
    pub total: u64,
    pub available: u64,
}

/// Source of memory figures.
pub trait MemoryProbe: Send + Sync + 'static {
    fn snapshot(&self) -> MemorySnapshot;
}

/// Reads system memory through sysinfo.
pub struct SystemMemoryProbe {
    system: Mutex<System>,
}

impl SystemMemoryProbe {
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
        }
    }
}

impl Default for SystemMemoryProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryProbe for SystemMemoryProbe {
    fn snapshot(&self) -> MemorySnapshot {
        let mut system = self.system.lock();
        system.refresh_memory();
        MemorySnapshot {
            total: system.total_memory(),
            available: system.available_memory(),
        }
    }
}

/// Configuration for the memory wiper.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WipeConfig {
    pub page_size: usize,
    /// Pages per allocated block.
    pub pages_per_block: usize,
    /// Share of the reported available memory taken at face value.
    pub available_discount_percent: u8,
    /// Headroom, as a share of total memory, that must stay free.
    pub reserve_percent: u8,
    /// Pressure at or above this level stops the wipe.
    pub pressure_threshold: PressureLevel,
    /// Optional cap on the bytes wiped per run.
    pub max_total_bytes: Option<u64>,
}

impl Default for WipeConfig {
    fn default() -> Self {
        Self {
            page_size: 4096,
            pages_per_block: 250,
            available_discount_percent: 75,
            reserve_percent: 10,
            pressure_threshold: PressureLevel::RunningModerate,
            max_total_bytes: None,
        }
    }
}

impl WipeConfig {
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn with_pages_per_block(mut self, pages: usize) -> Self {
        self.pages_per_block = pages.max(1);
        self
    }

    pub fn with_reserve_percent(mut self, percent: u8) -> Self {
        self.reserve_percent = percent.min(100);
        self
    }

    pub fn with_pressure_threshold(mut self, level: PressureLevel) -> Self {
        self.pressure_threshold = level;
        self
    }

    pub fn with_max_total_bytes(mut self, bytes: u64) -> Self {
        self.max_total_bytes = Some(bytes);
        self
    }

    pub fn block_size(&self) -> usize {
        self.page_size.saturating_mul(self.pages_per_block)
    }

    /// Reported availability is optimistic, so only part of it counts.
    pub fn is_low_memory(&self, snapshot: MemorySnapshot) -> bool {
        let usable = snapshot.available / 100 * u64::from(self.available_discount_percent);
        let reserve = snapshot.total / 100 * u64::from(self.reserve_percent);
        usable < reserve
    }
}

/// Why a wipe run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    LowMemory,
    AllocationFailed,
    Pressure,
    Limit,
}

/// Outcome of one wipe run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WipeReport {
    pub wiped_bytes: u64,
    pub blocks: usize,
    pub reason: StopReason,
}

/// Runs memory wipes on a dedicated thread.
pub struct MemoryWiper {
    config: WipeConfig,
    probe: Arc<dyn MemoryProbe>,
    stop: Arc<AtomicBool>,
    max_pressure: Mutex<Option<PressureLevel>>,
    worker: Mutex<Option<JoinHandle<WipeReport>>>,
}

impl MemoryWiper {
    pub fn new(config: WipeConfig) -> Self {
        Self::with_probe(config, Arc::new(SystemMemoryProbe::new()))
    }

    pub fn with_probe(config: WipeConfig, probe: Arc<dyn MemoryProbe>) -> Self {
        Self {
            config,
            probe,
            stop: Arc::new(AtomicBool::new(false)),
            max_pressure: Mutex::new(None),
            worker: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &WipeConfig {
        &self.config
    }

    /// Start a wipe unless one is already running.
    pub fn evict_on_lock(&self) {
        let mut worker = self.worker.lock();
        if worker.as_ref().is_some_and(|handle| !handle.is_finished()) {
            debug!("Memory wipe already running");
            return;
        }

        self.stop.store(false, Ordering::SeqCst);
        let config = self.config.clone();
        let probe = self.probe.clone();
        let stop = self.stop.clone();

        let spawned = thread::Builder::new()
            .name("memory-wipe".to_string())
            .spawn(move || {
                let report = wipe(&config, probe.as_ref(), &stop);
                info!(
                    "Total wiped: {} bytes in {} blocks ({:?})",
                    report.wiped_bytes, report.blocks, report.reason
                );
                report
            });

        match spawned {
            Ok(handle) => *worker = Some(handle),
            Err(e) => warn!("Failed to start memory wipe: {}", e),
        }
    }

    /// Record a pressure signal; severe enough pressure stops a running wipe.
    pub fn evict_on_pressure(&self, level: PressureLevel) {
        debug!("Memory pressure: {:?}", level);
        {
            let mut max = self.max_pressure.lock();
            if max.is_none_or(|current| level > current) {
                *max = Some(level);
            }
        }

        if level >= self.config.pressure_threshold {
            self.stop.store(true, Ordering::SeqCst);
        }
    }

    /// Highest pressure level seen so far.
    pub fn max_pressure(&self) -> Option<PressureLevel> {
        *self.max_pressure.lock()
    }

    pub fn is_running(&self) -> bool {
        self.worker
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Block until the current wipe finishes and return its report.
    pub fn wait(&self) -> Option<WipeReport> {
        let handle = self.worker.lock().take()?;
        match handle.join() {
            Ok(report) => {
                debug!("Memory pressure: max={:?}", self.max_pressure());
                Some(report)
            }
            Err(_) => {
                warn!("Memory wipe thread panicked");
                None
            }
        }
    }
}

fn wipe(config: &WipeConfig, probe: &dyn MemoryProbe, stop: &AtomicBool) -> WipeReport {
    let block_size = config.block_size();
    let mut blocks: Vec<Vec<u8>> = Vec::new();
    let mut rng = rand::rng();
    let mut total = 0u64;

    let reason = 'wipe: loop {
        if config.is_low_memory(probe.snapshot()) {
            break StopReason::LowMemory;
        }
        if config.max_total_bytes.is_some_and(|max| total >= max) {
            break StopReason::Limit;
        }

        let mut block: Vec<u8> = Vec::new();
        if block.try_reserve_exact(block_size).is_err() {
            break StopReason::AllocationFailed;
        }
        block.resize(block_size, 0);

        for page in block.chunks_mut(config.page_size) {
            if stop.load(Ordering::SeqCst) {
                break 'wipe StopReason::Pressure;
            }
            rng.fill_bytes(page);
            total += page.len() as u64;
            thread::yield_now();
        }

        blocks.push(block);
    };

    let count = std::hint::black_box(&blocks).len();
    drop(blocks);

    WipeReport {
        wiped_bytes: total,
        blocks: count,
        reason,
    }
}
