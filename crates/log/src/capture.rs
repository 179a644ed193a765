//! In-memory ring of recent records, used by tests and diagnostics.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, OnceLock};

use crate::record::Record;

static ENABLED: AtomicBool = AtomicBool::new(false);
static CAPACITY: AtomicUsize = AtomicUsize::new(0);
static RING: OnceLock<Mutex<VecDeque<Record>>> = OnceLock::new();

pub fn enable_capture(capacity: usize) {
    if capacity == 0 {
        disable_capture();
        return;
    }
    CAPACITY.store(capacity, Ordering::Relaxed);
    RING.get_or_init(|| Mutex::new(VecDeque::with_capacity(capacity.min(4096))));
    ENABLED.store(true, Ordering::Relaxed);
}

pub fn disable_capture() {
    ENABLED.store(false, Ordering::Relaxed);
}

pub fn capture_enabled() -> bool {
    ENABLED.load(Ordering::Relaxed)
}

pub fn clear_captured() {
    if let Some(Ok(mut ring)) = RING.get().map(Mutex::lock) {
        ring.clear();
    }
}

/// Most recent `limit` records, oldest first.
pub fn capture_snapshot(limit: usize) -> Vec<Record> {
    let Some(Ok(ring)) = RING.get().map(Mutex::lock) else {
        return Vec::new();
    };
    let start = ring.len().saturating_sub(limit);
    ring.iter().skip(start).cloned().collect()
}

pub(crate) fn push(record: Record) {
    let Some(Ok(mut ring)) = RING.get().map(Mutex::lock) else {
        return;
    };
    let cap = CAPACITY.load(Ordering::Relaxed);
    if cap == 0 {
        return;
    }
    ring.push_back(record);
    while ring.len() > cap {
        ring.pop_front();
    }
}
