//! Allocator-aware memory accounting.
//!
//! [`TrackingAlloc`] wraps the system allocator and keeps a live-byte counter;
//! a binary opts in with `#[global_allocator]`. Requested sizes are rounded up
//! to machine word alignment so the counter tracks what the allocator actually
//! hands out for small odd-sized requests.

use std::alloc::{GlobalAlloc, Layout, System};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;

static USED: AtomicUsize = AtomicUsize::new(0);

/// Called when the underlying allocator returns null. The default logs the
/// failed request size and aborts.
pub type OomHandler = fn(usize);

static OOM_HANDLER: RwLock<OomHandler> = RwLock::new(default_oom_handler);

fn default_oom_handler(size: usize) {
    eprintln!("out of memory allocating {size} bytes, aborting");
    std::process::abort();
}

/// Installs an out-of-memory handler, replacing the default abort.
pub fn set_oom_handler(handler: OomHandler) {
    *OOM_HANDLER.write().unwrap() = handler;
}

fn oom(size: usize) {
    let handler = *OOM_HANDLER.read().unwrap();
    handler(size);
}

const WORD: usize = std::mem::size_of::<usize>();

fn rounded(size: usize) -> usize {
    (size + WORD - 1) & !(WORD - 1)
}

/// Live bytes currently allocated through [`TrackingAlloc`], word-rounded.
pub fn used_memory() -> usize {
    USED.load(Ordering::Relaxed)
}

/// Counting wrapper over the system allocator.
///
/// ```ignore
/// #[global_allocator]
/// static ALLOC: cinderdb::mem::TrackingAlloc = cinderdb::mem::TrackingAlloc;
/// ```
pub struct TrackingAlloc;

unsafe impl GlobalAlloc for TrackingAlloc {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        let ptr = System.alloc(layout);
        if ptr.is_null() {
            oom(layout.size());
        } else {
            USED.fetch_add(rounded(layout.size()), Ordering::Relaxed);
        }
        ptr
    }

    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        let ptr = System.alloc_zeroed(layout);
        if ptr.is_null() {
            oom(layout.size());
        } else {
            USED.fetch_add(rounded(layout.size()), Ordering::Relaxed);
        }
        ptr
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        USED.fetch_sub(rounded(layout.size()), Ordering::Relaxed);
        System.dealloc(ptr, layout);
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        let new_ptr = System.realloc(ptr, layout, new_size);
        if new_ptr.is_null() {
            oom(new_size);
        } else {
            USED.fetch_sub(rounded(layout.size()), Ordering::Relaxed);
            USED.fetch_add(rounded(new_size), Ordering::Relaxed);
        }
        new_ptr
    }
}

/// Samples the process resident-set size from the OS, in bytes. Returns None
/// where the proc filesystem is unavailable.
pub fn sample_rss() -> Option<u64> {
    let status = std::fs::read_to_string("/proc/self/status").ok()?;
    for line in status.lines() {
        if let Some(rest) = line.strip_prefix("VmRSS:") {
            let kb: u64 = rest.trim().trim_end_matches("kB").trim().parse().ok()?;
            return Some(kb * 1024);
        }
    }
    None
}
