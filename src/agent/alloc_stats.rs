//! Process-wide allocation counters, standing in for the runtime
//! GC/heap statistics the runtime poller samples (spec §4.4). Rust has
//! no tracing garbage collector, so `Alloc`/`TotalAlloc`/`Mallocs`/
//! `Frees` are populated from a counting allocator wrapping the system
//! allocator — the allocator-equivalent figures the language actually
//! exposes. The remaining `runtime.MemStats` field names have no Rust
//! analogue and are reported as zero so the wire shape stays intact.

use std::alloc::{GlobalAlloc, Layout, System};
use std::sync::atomic::{AtomicU64, Ordering};

struct Counters {
    current_bytes: AtomicU64,
    total_bytes: AtomicU64,
    mallocs: AtomicU64,
    frees: AtomicU64,
}

static COUNTERS: Counters = Counters {
    current_bytes: AtomicU64::new(0),
    total_bytes: AtomicU64::new(0),
    mallocs: AtomicU64::new(0),
    frees: AtomicU64::new(0),
};

pub struct CountingAllocator;

unsafe impl GlobalAlloc for CountingAllocator {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        let ptr = System.alloc(layout);
        if !ptr.is_null() {
            let size = layout.size() as u64;
            COUNTERS.current_bytes.fetch_add(size, Ordering::Relaxed);
            COUNTERS.total_bytes.fetch_add(size, Ordering::Relaxed);
            COUNTERS.mallocs.fetch_add(1, Ordering::Relaxed);
        }
        ptr
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        System.dealloc(ptr, layout);
        COUNTERS
            .current_bytes
            .fetch_sub(layout.size() as u64, Ordering::Relaxed);
        COUNTERS.frees.fetch_add(1, Ordering::Relaxed);
    }
}

#[global_allocator]
static ALLOCATOR: CountingAllocator = CountingAllocator;

#[derive(Debug, Clone, Copy, Default)]
pub struct Snapshot {
    pub current_bytes: u64,
    pub total_bytes: u64,
    pub mallocs: u64,
    pub frees: u64,
}

pub fn snapshot() -> Snapshot {
    Snapshot {
        current_bytes: COUNTERS.current_bytes.load(Ordering::Relaxed),
        total_bytes: COUNTERS.total_bytes.load(Ordering::Relaxed),
        mallocs: COUNTERS.mallocs.load(Ordering::Relaxed),
        frees: COUNTERS.frees.load(Ordering::Relaxed),
    }
}
