//! Two-sided stack allocator for scratch tensors.

use log::debug;

/// Alignment of individual reservations.
const CACHE_LINE: usize = 64;

/// Alignment of the backing allocation.
const PAGE: usize = 4096;

/// Handle of a scratch reservation.
///
/// Positive handles index the left (even-layer) side of the arena,
/// negative handles the right (odd-layer) side. Magnitudes are
/// monotonically increasing reservation ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScratchHandle(i64);

impl ScratchHandle {
    /// Raw signed id; the sign encodes the arena side.
    pub fn raw(self) -> i64 {
        self.0
    }

    fn index(self) -> usize {
        (self.0.unsigned_abs() as usize) - 1
    }
}

/// Reserving-phase arena.
///
/// `reserve`/`release` calls simulate the lifetimes of all scratch
/// tensors and track the peak concurrent footprint. Consuming the
/// arena with [`ScratchArena::allocate`] performs the single physical
/// allocation and freezes the handle→offset mapping; pointer queries
/// only exist on the resulting [`ScratchMemory`], so the two-phase
/// protocol is enforced at compile time.
#[derive(Debug, Default)]
pub struct ScratchArena {
    /// Last id handed out to any reservation.
    last_id: i64,
    /// Current nesting layer; parity selects the arena side.
    layer: i64,
    /// Byte offset per reservation, indexed by id magnitude - 1.
    offsets: Vec<isize>,
    /// Live left-side reservations as (id, top-of-stack after push).
    live_left: Vec<(i64, isize)>,
    /// Live right-side reservations as (id, offset of the push).
    live_right: Vec<(i64, isize)>,
    /// Peak of (left top - right top) over the reservation history.
    peak: isize,
    /// Per-thread packing scratch requirement in bytes.
    thread_bytes: usize,
}

impl ScratchArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enters a nested layer; reservations made inside belong to the
    /// next tree level.
    pub fn enter_layer(&mut self) {
        self.layer += 1;
    }

    /// Leaves the current layer.
    pub fn leave_layer(&mut self) {
        self.layer -= 1;
    }

    /// Reserves `bytes` of scratch on the side selected by the current
    /// layer parity and returns its handle.
    pub fn reserve(&mut self, bytes: usize) -> ScratchHandle {
        self.last_id += 1;
        let size = bytes.next_multiple_of(CACHE_LINE) as isize;

        let handle = if self.layer % 2 == 0 {
            let base = self.live_left.last().map_or(0, |&(_, top)| top);
            self.offsets.push(base);
            self.live_left.push((self.last_id, base + size));
            ScratchHandle(self.last_id)
        } else {
            let base = self.live_right.last().map_or(0, |&(_, off)| off);
            let offset = base - size;
            self.offsets.push(offset);
            self.live_right.push((-self.last_id, offset));
            ScratchHandle(-self.last_id)
        };

        let top_left = self.live_left.last().map_or(0, |&(_, top)| top);
        let top_right = self.live_right.last().map_or(0, |&(_, off)| off);
        self.peak = self.peak.max(top_left - top_right);

        handle
    }

    /// Releases a reservation.
    ///
    /// The entry may sit anywhere in its side's stack: nodes shared by
    /// several parents are freed out of strict LIFO order.
    pub fn release(&mut self, handle: ScratchHandle) {
        let side = if handle.0 >= 0 {
            &mut self.live_left
        } else {
            &mut self.live_right
        };
        if let Some(pos) = side.iter().position(|&(id, _)| id == handle.0) {
            side.remove(pos);
        }
    }

    /// Raises the per-thread packing scratch requirement to `bytes`.
    pub fn reserve_thread_bytes(&mut self, bytes: usize) {
        self.thread_bytes = self.thread_bytes.max(bytes);
    }

    /// Peak concurrent footprint of all reservations so far.
    pub fn peak_bytes(&self) -> usize {
        self.peak as usize
    }

    /// Performs the single physical allocation and freezes the
    /// handle→offset mapping.
    pub fn allocate(self, num_threads: usize) -> ScratchMemory {
        let peak = self.peak as usize;
        debug!(
            "allocating scratch arena: {} bytes peak, {} bytes thread scratch x {}",
            peak, self.thread_bytes, num_threads
        );

        let buf = vec![0u8; peak + PAGE];
        let misalign = buf.as_ptr() as usize % PAGE;
        let base = if misalign == 0 { 0 } else { PAGE - misalign };

        let thread_bytes = self.thread_bytes.next_multiple_of(CACHE_LINE);
        let thread_bufs = (0..num_threads.max(1))
            .map(|_| vec![0u8; thread_bytes])
            .collect();

        ScratchMemory {
            buf,
            base,
            peak,
            offsets: self.offsets,
            thread_bufs,
        }
    }
}

/// Allocated-phase arena: one page-aligned backing allocation plus the
/// frozen handle→offset table, and one packing-scratch buffer per
/// worker thread.
#[derive(Debug)]
pub struct ScratchMemory {
    buf: Vec<u8>,
    base: usize,
    peak: usize,
    offsets: Vec<isize>,
    thread_bufs: Vec<Vec<u8>>,
}

impl ScratchMemory {
    /// Pointer to the reservation behind `handle`.
    ///
    /// Left-side handles index forward from the aligned base, right
    /// side handles forward from `base + peak`, realizing two
    /// independently growing regions in one allocation.
    pub fn ptr(&self, handle: ScratchHandle) -> *mut u8 {
        let offset = self.offsets[handle.index()];
        let origin = if handle.0 >= 0 {
            self.base as isize
        } else {
            (self.base + self.peak) as isize
        };
        unsafe { self.buf.as_ptr().offset(origin + offset) as *mut u8 }
    }

    /// Packing scratch of the given worker thread.
    pub fn thread_ptr(&self, thread: usize) -> *mut u8 {
        self.thread_bufs[thread].as_ptr() as *mut u8
    }

    /// Number of per-thread packing buffers.
    pub fn num_threads(&self) -> usize {
        self.thread_bufs.len()
    }

    /// Peak footprint the backing allocation was sized for.
    pub fn peak_bytes(&self) -> usize {
        self.peak
    }
}
