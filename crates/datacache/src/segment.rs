// SPDX-License-Identifier: Apache-2.0

//! OS-backed memory segments.

use crate::error::Error;

/// How a segment's bytes are provisioned.
enum Backing {
    /// Anonymous memory map; eligible for `madvise`-based disclaim.
    #[cfg(unix)]
    Mapped(memmap2::MmapMut),
    /// Plain heap memory; disclaim is unavailable.
    Heap(Vec<u8>),
}

/// One contiguous region backing data caches.
///
/// Segments are allocated page-aligned and never shrink or move while live.
/// When disclaim is in play the segment is an anonymous map advised
/// `NoHugePage` (huge pages cannot be paged out piecemeal).
pub struct Segment {
    backing: Backing,
    len: usize,
}

impl Segment {
    /// Allocates a segment of exactly `len` bytes (the caller has already
    /// rounded to page size). `mapped` requests an OS map instead of heap
    /// memory so the region can be disclaimed later; platforms without maps
    /// silently fall back to heap memory.
    pub fn new(len: usize, mapped: bool) -> Result<Self, Error> {
        let backing = if mapped {
            mapped_backing(len)?
        } else {
            Backing::Heap(vec![0; len])
        };
        Ok(Segment { backing, len })
    }

    /// Total length in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// True for zero-length segments (never created in practice).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The segment's bytes.
    pub fn bytes_mut(&mut self) -> &mut [u8] {
        match &mut self.backing {
            #[cfg(unix)]
            Backing::Mapped(map) => &mut map[..],
            Backing::Heap(heap) => &mut heap[..],
        }
    }

    /// Read-only view of the segment's bytes.
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        match &self.backing {
            #[cfg(unix)]
            Backing::Mapped(map) => &map[..],
            Backing::Heap(heap) => &heap[..],
        }
    }

    /// Whether this segment can be disclaimed at all.
    #[must_use]
    pub fn supports_disclaim(&self) -> bool {
        match &self.backing {
            #[cfg(unix)]
            Backing::Mapped(_) => true,
            Backing::Heap(_) => false,
        }
    }

    /// Asks the OS to page this segment out.
    ///
    /// `Ok(true)` when the kernel accepted the advice, `Ok(false)` when the
    /// segment is not disclaimable, and `Err` with the OS error otherwise
    /// (the caller disables disclaiming on `EINVAL`).
    pub fn disclaim(&self) -> std::io::Result<bool> {
        match &self.backing {
            #[cfg(unix)]
            Backing::Mapped(map) => {
                map.advise(memmap2::Advice::PageOut)?;
                Ok(true)
            }
            Backing::Heap(_) => Ok(false),
        }
    }
}

#[cfg(unix)]
fn mapped_backing(len: usize) -> Result<Backing, Error> {
    let map = memmap2::MmapMut::map_anon(len)
        .map_err(|source| Error::SegmentAllocation { size: len, source })?;
    if let Err(error) = map.advise(memmap2::Advice::NoHugePage) {
        // Harmless: the kernel may simply predate the advice.
        tracing::debug!(%error, "NoHugePage advise rejected");
    }
    Ok(Backing::Mapped(map))
}

#[cfg(not(unix))]
fn mapped_backing(len: usize) -> Result<Backing, Error> {
    Ok(Backing::Heap(vec![0; len]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heap_segment_is_zeroed_and_sized() {
        let mut segment = Segment::new(4096, false).expect("heap segment");
        assert_eq!(segment.len(), 4096);
        assert!(segment.bytes_mut().iter().all(|&b| b == 0));
        assert!(!segment.supports_disclaim());
    }

    #[cfg(unix)]
    #[test]
    fn mapped_segment_supports_disclaim() {
        let segment = Segment::new(4096, true).expect("mapped segment");
        assert!(segment.supports_disclaim());
        // PageOut may or may not be honoured by the kernel under test; only
        // hard errors other than EINVAL would be surprising.
        match segment.disclaim() {
            Ok(done) => assert!(done),
            Err(error) => {
                assert_eq!(error.kind(), std::io::ErrorKind::InvalidInput);
            }
        }
    }
}
