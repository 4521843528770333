//! Deterministic partitioning of a byte range into chunks.
//!
//! The plan tiles `[0, total_size)` with contiguous, non-overlapping
//! windows sorted by start offset; the last window absorbs the integer
//! division remainder. Same inputs, same plan.

use super::{Chunk, ChunkStorage};

/// Upper bound on a single chunk's length.
pub const MAX_CHUNK_LEN: u64 = i32::MAX as u64;

/// Raise `requested` until every planned chunk fits under
/// [`MAX_CHUNK_LEN`].
///
/// The minimum is `ceil(total_size / MAX_CHUNK_LEN)`; because the last
/// chunk also swallows the division remainder, one extra part is
/// occasionally needed on top of that.
pub fn clamp_chunk_count(total_size: u64, requested: u32) -> u32 {
    let mut parts = u64::from(requested.max(1)).max(total_size.div_ceil(MAX_CHUNK_LEN).max(1));
    while last_chunk_len(total_size, parts) > MAX_CHUNK_LEN {
        parts += 1;
    }
    parts.min(u64::from(u32::MAX)) as u32
}

fn last_chunk_len(total_size: u64, parts: u64) -> u64 {
    let chunk_size = (total_size / parts).max(1);
    total_size.saturating_sub(chunk_size * (parts - 1))
}

/// Partition `[0, total_size)` into `parts` chunks.
///
/// `parts` is coerced to at least 1. When the resource is smaller than the
/// requested part count, the plan degrades to one single-byte chunk per
/// byte. `total_size` of 0 yields an empty plan; the orchestrator rejects
/// such resources before planning.
pub fn plan_chunks(
    total_size: u64,
    parts: u32,
    max_failover: u32,
    on_the_fly: bool,
) -> Vec<Chunk> {
    if total_size == 0 {
        return Vec::new();
    }

    let mut parts = u64::from(parts.max(1));
    let mut chunk_size = total_size / parts;
    if chunk_size < 1 {
        chunk_size = 1;
        parts = total_size;
    }

    (0..parts)
        .map(|i| {
            let start = i * chunk_size;
            let end = if i == parts - 1 {
                total_size - 1
            } else {
                start + chunk_size - 1
            };
            let storage = if on_the_fly {
                ChunkStorage::Memory { data: None }
            } else {
                ChunkStorage::Disk { path: None }
            };
            Chunk::new(i as u32, start, end, max_failover, storage)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan(total: u64, parts: u32) -> Vec<Chunk> {
        plan_chunks(total, parts, 0, true)
    }

    /// Contiguous, disjoint, sorted, covering exactly `[0, total - 1]`.
    fn assert_tiles(chunks: &[Chunk], total: u64) {
        assert!(!chunks.is_empty());
        assert_eq!(chunks[0].start(), 0);
        assert_eq!(chunks.last().unwrap().end(), total - 1);
        for pair in chunks.windows(2) {
            assert_eq!(pair[1].start(), pair[0].end() + 1);
        }
        let covered: u64 = chunks.iter().map(Chunk::length).sum();
        assert_eq!(covered, total);
    }

    #[test]
    fn test_tiling_over_input_grid() {
        for total in [1u64, 2, 3, 7, 100, 1000, 1024, 65_537] {
            for parts in 1u32..=12 {
                let chunks = plan(total, parts);
                assert_tiles(&chunks, total);
            }
        }
    }

    #[test]
    fn test_last_chunk_absorbs_remainder() {
        let chunks = plan(1000, 3);
        assert_eq!(chunks.len(), 3);
        assert_eq!((chunks[0].start(), chunks[0].end()), (0, 332));
        assert_eq!((chunks[1].start(), chunks[1].end()), (333, 665));
        assert_eq!((chunks[2].start(), chunks[2].end()), (666, 999));
        assert_eq!(chunks[2].length(), 334);
    }

    #[test]
    fn test_more_parts_than_bytes_degrades_to_single_byte_chunks() {
        let chunks = plan(5, 16);
        assert_eq!(chunks.len(), 5);
        assert!(chunks.iter().all(|c| c.length() == 1));
        assert_tiles(&chunks, 5);
    }

    #[test]
    fn test_plan_is_deterministic() {
        let a = plan(987_654, 7);
        let b = plan(987_654, 7);
        let bounds = |cs: &[Chunk]| cs.iter().map(|c| (c.start(), c.end())).collect::<Vec<_>>();
        assert_eq!(bounds(&a), bounds(&b));
    }

    #[test]
    fn test_ids_follow_plan_order() {
        let chunks = plan(4096, 4);
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.id(), i as u32);
        }
    }

    #[test]
    fn test_clamp_forces_three_parts_for_five_gib() {
        let five_gib = 5 * 1024 * 1024 * 1024u64;
        let parts = clamp_chunk_count(five_gib, 1);
        assert!(parts >= 3);

        let chunks = plan(five_gib, parts);
        assert_tiles(&chunks, five_gib);
        assert!(chunks.iter().all(|c| c.length() <= MAX_CHUNK_LEN));
    }

    #[test]
    fn test_clamp_respects_larger_requests() {
        assert_eq!(clamp_chunk_count(1024, 8), 8);
        assert_eq!(clamp_chunk_count(1024, 0), 1);
    }

    #[test]
    fn test_size_bound_holds_at_awkward_totals() {
        // Totals just under an exact multiple of the bound push the
        // remainder into the last chunk; the clamp must absorb that too.
        for total in [
            MAX_CHUNK_LEN,
            MAX_CHUNK_LEN + 1,
            2 * MAX_CHUNK_LEN - 1,
            2 * MAX_CHUNK_LEN + 1,
            3 * MAX_CHUNK_LEN - 1,
        ] {
            let parts = clamp_chunk_count(total, 1);
            let chunks = plan(total, parts);
            assert_tiles(&chunks, total);
            let widest = chunks.iter().map(Chunk::length).max().unwrap();
            assert!(
                widest <= MAX_CHUNK_LEN,
                "total {total}: widest chunk {widest} exceeds bound"
            );
        }
    }
}
