//! Partition rule: which consumer owns a sequence number.

/// Maps a global sequence number onto one of `partitions` owners.
///
/// Implementations must be pure: the same `(sequence, partitions)` always
/// yields the same owner, and the result is in `0..partitions`.
pub trait Partitioner: Send + Sync + std::fmt::Debug {
    /// Owning partition index for `sequence`.
    fn partition(&self, sequence: u64, partitions: usize) -> usize;
}

/// `sequence mod partitions`. Partition `k` observes exactly the
/// sub-sequence `s ≡ k (mod N)` in increasing order.
#[derive(Debug, Clone, Copy, Default)]
pub struct ModuloPartitioner;

impl Partitioner for ModuloPartitioner {
    #[inline]
    fn partition(&self, sequence: u64, partitions: usize) -> usize {
        debug_assert!(partitions > 0);
        (sequence % partitions as u64) as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_modulo_assignment() {
        let p = ModuloPartitioner;
        let owners: Vec<usize> = (0..6).map(|s| p.partition(s, 2)).collect();
        assert_eq!(owners, vec![0, 1, 0, 1, 0, 1]);
    }

    #[test]
    fn test_single_partition_owns_everything() {
        let p = ModuloPartitioner;
        assert!((0..100).all(|s| p.partition(s, 1) == 0));
    }

    #[test]
    fn test_every_sequence_has_exactly_one_owner() {
        let p = ModuloPartitioner;
        let n = 5;
        for s in 0..1_000u64 {
            let owners = (0..n).filter(|&k| p.partition(s, n) == k).count();
            assert_eq!(owners, 1);
        }
    }

    #[test]
    fn test_partitions_are_balanced_for_monotonic_sequences() {
        let p = ModuloPartitioner;
        let n = 3;
        let mut counts = vec![0usize; n];
        for s in 0..(n as u64 * 40) {
            counts[p.partition(s, n)] += 1;
        }
        assert_eq!(counts, vec![40, 40, 40]);
    }
}
