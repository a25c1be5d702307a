// SPDX-License-Identifier: Apache-2.0

//! The data-cache manager proper.

use crate::error::Error;
use crate::segment::Segment;
use jitc_config::DataCacheOptions;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

/// Bytes of bookkeeping in front of every record payload.
pub const HEADER_SIZE: u32 = 8;

/// Paint written over freed payloads when `paint-on-free` is set.
const PAINT: [u8; 4] = [0xDA, 0x7A, 0xCA, 0xCE];

/// Page granularity segments are rounded to.
const PAGE_SIZE: u32 = 4096;

/// What a record holds. Stored in the record header so diagnostics can walk
/// a segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordType {
    /// A reclaimed record waiting in the pool.
    Free,
    /// Exception-range table of a compiled body.
    ExceptionInfo,
    /// GC stack atlas of a compiled body.
    StackAtlas,
    /// Relocation records of an AOT body.
    RelocationData,
    /// Thunk mapping data.
    ThunkMapping,
    /// Anything else.
    Scratch,
}

impl RecordType {
    fn to_raw(self) -> u32 {
        match self {
            RecordType::Free => 0,
            RecordType::ExceptionInfo => 1,
            RecordType::StackAtlas => 2,
            RecordType::RelocationData => 3,
            RecordType::ThunkMapping => 4,
            RecordType::Scratch => 5,
        }
    }
}

/// Handle to a live record. Indices, not addresses: the pair stays valid
/// across segment relocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Record {
    segment: u32,
    offset: u32,
    payload_len: u32,
}

impl Record {
    /// Usable payload length, excluding the header.
    #[must_use]
    pub fn payload_len(&self) -> u32 {
        self.payload_len
    }

    /// (segment, offset) location of the record header; stable for the
    /// record's lifetime and reusable for identity assertions.
    #[must_use]
    pub fn location(&self) -> (u32, u32) {
        (self.segment, self.offset)
    }
}

/// A cache reserved by one thread through the legacy bump path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReservedCache {
    index: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CacheStatus {
    Active,
    Reserved,
    AlmostFull,
}

#[derive(Debug)]
struct CacheState {
    segment: usize,
    mark: u32,
    end: u32,
    status: CacheStatus,
}

impl CacheState {
    fn remaining(&self) -> u32 {
        self.end - self.mark
    }
}

/// Bookkeeping counters, all in bytes unless noted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DataCacheStats {
    /// Sum of all segment sizes ever allocated.
    pub total_segment_bytes: u64,
    /// Sum of the sizes of chunks currently in the pool.
    pub bytes_in_pool: u64,
    /// Records currently live (count).
    pub live_records: u64,
    /// Records handed out over the manager's lifetime (count).
    pub allocations: u64,
    /// Records returned over the manager's lifetime (count).
    pub frees: u64,
    /// Segments allocated (count).
    pub segments: u64,
}

struct Inner {
    segments: Vec<Segment>,
    caches: Vec<CacheState>,
    /// Ordered size buckets; each bucket is a LIFO stack of same-sized free
    /// chunks identified by (segment, offset).
    pool: BTreeMap<u32, Vec<(u32, u32)>>,
    stats: DataCacheStats,
}

/// The manager. One per VM; all operations enter the data-cache monitor
/// briefly.
pub struct DataCacheManager {
    options: DataCacheOptions,
    min_chunk: u32,
    segment_size: u32,
    inner: Mutex<Inner>,
    full: AtomicBool,
    disclaim_enabled: AtomicBool,
}

impl DataCacheManager {
    /// Creates a manager from validated options.
    pub fn new(options: &DataCacheOptions) -> Result<Self, Error> {
        let segment_size = u32::try_from(options.segment_size)
            .map_err(|_| Error::OversizedAllocation {
                requested: options.segment_size,
            })?;
        let min_chunk = options.quantum_size * options.min_quanta;
        Ok(DataCacheManager {
            options: options.clone(),
            min_chunk,
            segment_size: align_up(segment_size, PAGE_SIZE),
            inner: Mutex::new(Inner {
                segments: Vec::new(),
                caches: Vec::new(),
                pool: BTreeMap::new(),
                stats: DataCacheStats::default(),
            }),
            full: AtomicBool::new(false),
            disclaim_enabled: AtomicBool::new(!options.disable_disclaiming),
        })
    }

    /// The smallest chunk the pool will track.
    #[must_use]
    pub fn min_chunk(&self) -> u32 {
        self.min_chunk
    }

    /// Whether the total-memory cap has been hit.
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.full.load(Ordering::Acquire)
    }

    /// Snapshot of the bookkeeping counters.
    #[must_use]
    pub fn stats(&self) -> DataCacheStats {
        self.inner.lock().stats
    }

    /// Percentage of segment memory occupied by live data. 100 when no
    /// segments exist yet.
    #[must_use]
    pub fn compute_data_cache_efficiency(&self) -> f64 {
        let inner = self.inner.lock();
        if inner.stats.total_segment_bytes == 0 {
            return 100.0;
        }
        let mut available: u64 = inner.stats.bytes_in_pool;
        for cache in &inner.caches {
            available += u64::from(cache.remaining());
        }
        100.0 * (inner.stats.total_segment_bytes - available) as f64
            / inner.stats.total_segment_bytes as f64
    }

    // ---- legacy bump path -------------------------------------------------

    /// Reserves a cache with at least `size_hint` contiguous bytes for the
    /// calling thread.
    pub fn reserve_available_data_cache(&self, size_hint: u32) -> Result<ReservedCache, Error> {
        let needed = self.aligned_total(size_hint)?;
        let mut inner = self.inner.lock();
        // Retire active caches that can no longer satisfy anybody.
        for cache in &mut inner.caches {
            if cache.status == CacheStatus::Active && cache.remaining() < self.min_chunk {
                cache.status = CacheStatus::AlmostFull;
            }
        }
        if let Some(index) = inner
            .caches
            .iter()
            .position(|c| c.status == CacheStatus::Active && c.remaining() >= needed)
        {
            inner.caches[index].status = CacheStatus::Reserved;
            return Ok(ReservedCache { index });
        }
        let segment = self.allocate_segment(&mut inner, needed)?;
        let end = inner.segments[segment].len() as u32;
        inner.caches.push(CacheState {
            segment,
            mark: 0,
            end,
            status: CacheStatus::Reserved,
        });
        Ok(ReservedCache {
            index: inner.caches.len() - 1,
        })
    }

    /// Bump-allocates a record inside a reserved cache.
    pub fn allocate_data_cache_space(
        &self,
        reserved: ReservedCache,
        payload: u32,
        record_type: RecordType,
    ) -> Result<Record, Error> {
        let total = self.aligned_total(payload)?;
        let mut inner = self.inner.lock();
        let cache = inner.caches.get(reserved.index).ok_or(Error::InvalidHandle)?;
        if cache.status != CacheStatus::Reserved {
            return Err(Error::InvalidHandle);
        }
        if cache.remaining() < total {
            return Err(Error::NoSpace { requested: total });
        }
        let segment = cache.segment;
        let offset = cache.mark;
        inner.caches[reserved.index].mark += total;
        write_header(&mut inner.segments[segment], offset, total, record_type);
        inner.stats.allocations += 1;
        inner.stats.live_records += 1;
        Ok(Record {
            segment: segment as u32,
            offset,
            payload_len: total - HEADER_SIZE,
        })
    }

    /// Returns a reserved cache to the active list.
    pub fn make_data_cache_available(&self, reserved: ReservedCache) -> Result<(), Error> {
        let mut inner = self.inner.lock();
        let cache = inner
            .caches
            .get_mut(reserved.index)
            .ok_or(Error::InvalidHandle)?;
        if cache.status != CacheStatus::Reserved {
            return Err(Error::InvalidHandle);
        }
        cache.status = if cache.remaining() < self.min_chunk {
            CacheStatus::AlmostFull
        } else {
            CacheStatus::Active
        };
        Ok(())
    }

    // ---- pooling path -----------------------------------------------------

    /// Allocates a record, preferring reclaimed chunks from the pool.
    pub fn allocate_data_cache_record(
        &self,
        payload: u32,
        record_type: RecordType,
    ) -> Result<Record, Error> {
        let total = self.aligned_total(payload)?;
        let mut inner = self.inner.lock();
        let (segment, offset, mut size) = match self.get_from_pool(&mut inner, total) {
            Some(chunk) => chunk,
            None => {
                // Empty-handed: a fresh segment becomes one big free chunk.
                let segment = self.allocate_segment(&mut inner, total)?;
                let len = inner.segments[segment].len() as u32;
                inner.stats.bytes_in_pool += u64::from(len);
                (segment as u32, 0, len)
            }
        };
        inner.stats.bytes_in_pool -= u64::from(size);
        if size >= total + self.min_chunk {
            // Split the tail off and hand it back to its bucket.
            let remainder_offset = offset + total;
            let remainder_size = size - total;
            write_header(
                &mut inner.segments[segment as usize],
                remainder_offset,
                remainder_size,
                RecordType::Free,
            );
            push_to_pool(&mut inner, segment, remainder_offset, remainder_size);
            size = total;
        }
        write_header(&mut inner.segments[segment as usize], offset, size, record_type);
        inner.stats.allocations += 1;
        inner.stats.live_records += 1;
        Ok(Record {
            segment,
            offset,
            payload_len: size - HEADER_SIZE,
        })
    }

    /// Returns a record to the pool.
    ///
    /// The record must have come from this manager and must not be used
    /// afterwards. With `disable-reclamation` set the record is abandoned
    /// in place.
    pub fn free_data_cache_record(&self, record: Record) -> Result<(), Error> {
        let mut inner = self.inner.lock();
        let segment = inner
            .segments
            .get(record.segment as usize)
            .ok_or(Error::InvalidHandle)?;
        let size = read_header_size(segment, record.offset).ok_or(Error::InvalidHandle)?;
        if size < self.min_chunk || record.offset + size > segment.len() as u32 {
            return Err(Error::InvalidHandle);
        }
        if self.options.paint_on_free {
            let bytes = inner.segments[record.segment as usize].bytes_mut();
            let start = (record.offset + HEADER_SIZE) as usize;
            let end = (record.offset + size) as usize;
            for (i, byte) in bytes[start..end].iter_mut().enumerate() {
                *byte = PAINT[i % PAINT.len()];
            }
        }
        inner.stats.frees += 1;
        inner.stats.live_records -= 1;
        if self.options.disable_reclamation {
            return Ok(());
        }
        write_header(
            &mut inner.segments[record.segment as usize],
            record.offset,
            size,
            RecordType::Free,
        );
        push_to_pool(&mut inner, record.segment, record.offset, size);
        Ok(())
    }

    /// Runs `f` over the record's payload bytes.
    pub fn with_payload_mut<R>(
        &self,
        record: Record,
        f: impl FnOnce(&mut [u8]) -> R,
    ) -> Result<R, Error> {
        let mut inner = self.inner.lock();
        let segment = inner
            .segments
            .get_mut(record.segment as usize)
            .ok_or(Error::InvalidHandle)?;
        let start = (record.offset + HEADER_SIZE) as usize;
        let end = start + record.payload_len as usize;
        let bytes = segment.bytes_mut();
        if end > bytes.len() {
            return Err(Error::InvalidHandle);
        }
        Ok(f(&mut bytes[start..end]))
    }

    // ---- disclaim ---------------------------------------------------------

    /// Asks the OS to page out every disclaimable segment.
    ///
    /// Returns the number of segments disclaimed. Self-disables when the
    /// kernel rejects the advice as unsupported.
    pub fn disclaim_all_data_caches(&self) -> usize {
        if !self.disclaim_enabled.load(Ordering::Acquire) || !self.options.disclaim_on_swap {
            return 0;
        }
        let inner = self.inner.lock();
        let mut disclaimed = 0;
        for segment in &inner.segments {
            if !segment.supports_disclaim() {
                tracing::debug!("segment is not backed by disclaimable memory");
                continue;
            }
            match segment.disclaim() {
                Ok(true) => disclaimed += 1,
                Ok(false) => {}
                Err(error) => {
                    tracing::warn!(%error, "failed to disclaim data cache segment");
                    if error.kind() == std::io::ErrorKind::InvalidInput {
                        // Old kernel without MADV_PAGEOUT; stop trying.
                        tracing::warn!("disabling data cache disclaiming from now on");
                        self.disclaim_enabled.store(false, Ordering::Release);
                        break;
                    }
                }
            }
        }
        disclaimed
    }

    // ---- internals --------------------------------------------------------

    /// Header-inclusive, quantum-aligned, minimum-respecting size of an
    /// allocation for `payload` bytes.
    fn aligned_total(&self, payload: u32) -> Result<u32, Error> {
        let total = u64::from(payload) + u64::from(HEADER_SIZE);
        let aligned = align_up_u64(total, u64::from(self.options.quantum_size))
            .max(u64::from(self.min_chunk));
        u32::try_from(aligned).map_err(|_| Error::OversizedAllocation {
            requested: u64::from(payload),
        })
    }

    fn allocate_segment(&self, inner: &mut Inner, min_size: u32) -> Result<usize, Error> {
        if self.is_full() {
            return Err(Error::DataCacheFull {
                cap_bytes: self.options.total_cap,
            });
        }
        let size = align_up(self.segment_size.max(min_size), PAGE_SIZE);
        if self.options.total_cap > 0
            && inner.stats.total_segment_bytes + u64::from(size) > self.options.total_cap
        {
            self.full.store(true, Ordering::Release);
            tracing::warn!(cap = self.options.total_cap, "data cache is full");
            return Err(Error::DataCacheFull {
                cap_bytes: self.options.total_cap,
            });
        }
        let mapped = !self.options.disable_disclaiming;
        let segment = Segment::new(size as usize, mapped)?;
        inner.segments.push(segment);
        inner.stats.total_segment_bytes += u64::from(size);
        inner.stats.segments += 1;
        Ok(inner.segments.len() - 1)
    }

    fn get_from_pool(&self, inner: &mut Inner, size: u32) -> Option<(u32, u32, u32)> {
        let mut key = inner
            .pool
            .range(size..)
            .next()
            .map(|(&bucket_size, _)| bucket_size)?;
        if self.options.worst_fit && key != size {
            // Not an exact fit anyway; take the biggest chunk we have.
            key = inner.pool.keys().next_back().copied()?;
        }
        let bucket = inner.pool.get_mut(&key)?;
        let (segment, offset) = bucket.pop()?;
        if bucket.is_empty() {
            let _ = inner.pool.remove(&key);
        }
        Some((segment, offset, key))
    }
}

fn push_to_pool(inner: &mut Inner, segment: u32, offset: u32, size: u32) {
    inner.pool.entry(size).or_default().push((segment, offset));
    inner.stats.bytes_in_pool += u64::from(size);
}

fn write_header(segment: &mut Segment, offset: u32, size: u32, record_type: RecordType) {
    let bytes = segment.bytes_mut();
    let offset = offset as usize;
    bytes[offset..offset + 4].copy_from_slice(&size.to_le_bytes());
    bytes[offset + 4..offset + 8].copy_from_slice(&record_type.to_raw().to_le_bytes());
}

fn read_header_size(segment: &Segment, offset: u32) -> Option<u32> {
    let bytes = segment.bytes();
    let offset = offset as usize;
    let raw: [u8; 4] = bytes.get(offset..offset + 4)?.try_into().ok()?;
    Some(u32::from_le_bytes(raw))
}

fn align_up(value: u32, to: u32) -> u32 {
    value.div_ceil(to) * to
}

fn align_up_u64(value: u64, to: u64) -> u64 {
    value.div_ceil(to) * to
}
