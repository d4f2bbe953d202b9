use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc, Mutex,
};
use std::thread;
use std::time::{Duration, Instant};

/// Shared transfer counters with an optional background reporter that
/// logs a line every `interval` while running.
#[derive(Clone)]
pub struct Progress {
    enabled: bool,
    interval: Duration,
    stage: Arc<Mutex<String>>,
    blocks_done: Arc<AtomicUsize>,
    blocks_total: Arc<AtomicUsize>,
    bytes_done: Arc<AtomicUsize>,
    running: Arc<AtomicBool>,
}

impl Progress {
    pub fn new(enabled: bool) -> Self {
        Self::with_interval(enabled, Duration::from_secs(5))
    }

    pub fn with_interval(enabled: bool, interval: Duration) -> Self {
        Self {
            enabled,
            interval,
            stage: Arc::new(Mutex::new(String::new())),
            blocks_done: Arc::new(AtomicUsize::new(0)),
            blocks_total: Arc::new(AtomicUsize::new(0)),
            bytes_done: Arc::new(AtomicUsize::new(0)),
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// A reporter that only counts.
    pub fn disabled() -> Self {
        Self::new(false)
    }

    pub fn set_stage(&self, s: &str, blocks_total: usize) {
        if let Ok(mut stage) = self.stage.lock() {
            *stage = s.to_string();
        }
        self.blocks_total.store(blocks_total, Ordering::Relaxed);
        self.blocks_done.store(0, Ordering::Relaxed);
        self.bytes_done.store(0, Ordering::Relaxed);
    }

    pub fn block_done(&self, bytes: usize) {
        self.blocks_done.fetch_add(1, Ordering::Relaxed);
        self.bytes_done.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn blocks_done(&self) -> usize {
        self.blocks_done.load(Ordering::Relaxed)
    }

    pub fn bytes_done(&self) -> usize {
        self.bytes_done.load(Ordering::Relaxed)
    }

    pub fn start(&self) {
        if !self.enabled || self.running.swap(true, Ordering::Relaxed) {
            return;
        }
        let this = self.clone();
        thread::spawn(move || {
            let t0 = Instant::now();
            while this.running.load(Ordering::Relaxed) {
                thread::sleep(this.interval);
                if !this.running.load(Ordering::Relaxed) {
                    break;
                }
                let stage = this.stage.lock().map(|s| s.clone()).unwrap_or_default();
                tracing::info!(
                    elapsed_s = t0.elapsed().as_secs(),
                    stage = %stage,
                    blocks = this.blocks_done.load(Ordering::Relaxed),
                    of = this.blocks_total.load(Ordering::Relaxed),
                    bytes = this.bytes_done.load(Ordering::Relaxed),
                    "transfer progress"
                );
            }
        });
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::Relaxed);
    }
}
