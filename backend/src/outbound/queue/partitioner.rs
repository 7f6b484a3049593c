//! Stable key-to-partition routing for the post event log.

use sha2::{Digest, Sha256};

/// Routes partition keys to a fixed number of partitions.
///
/// The mapping depends only on the key bytes and the partition count: the
/// first eight bytes of the key's SHA-256 digest, read big-endian, modulo
/// the count. Producers in different processes therefore agree on where an
/// author's events go.
///
/// # Examples
///
/// ```
/// use newsfeed::outbound::queue::Partitioner;
///
/// let partitioner = Partitioner::new(8);
/// assert_eq!(partitioner.partition_for("42"), partitioner.partition_for("42"));
/// assert!(partitioner.partition_for("42") < 8);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Partitioner {
    partitions: u32,
}

impl Partitioner {
    /// A partitioner over `partitions` partitions, at least one.
    pub fn new(partitions: u32) -> Self {
        Self {
            partitions: partitions.max(1),
        }
    }

    /// Number of partitions keys are spread over.
    pub fn partitions(&self) -> u32 {
        self.partitions
    }

    /// Partition owning `key`.
    pub fn partition_for(&self, key: &str) -> u32 {
        let digest = Sha256::digest(key.as_bytes());
        let mut prefix = [0_u8; 8];
        for (slot, byte) in prefix.iter_mut().zip(digest.iter()) {
            *slot = *byte;
        }
        let bucket = u64::from_be_bytes(prefix) % u64::from(self.partitions);
        u32::try_from(bucket).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    fn a_single_partition_takes_every_key() {
        let partitioner = Partitioner::new(0);
        assert_eq!(partitioner.partitions(), 1);
        assert_eq!(partitioner.partition_for("anything"), 0);
    }

    #[rstest]
    fn routing_follows_the_digest_prefix() {
        // SHA-256("1") begins 6b86b273ff34fce1.
        let expected = u32::try_from(0x6b86_b273_ff34_fce1_u64 % 12).expect("small");
        assert_eq!(Partitioner::new(12).partition_for("1"), expected);
    }

    #[rstest]
    fn keys_spread_across_partitions() {
        let partitioner = Partitioner::new(4);
        let mut seen = [false; 4];
        for key in 1..=64 {
            let partition = partitioner.partition_for(&key.to_string());
            if let Some(slot) = seen.get_mut(partition as usize) {
                *slot = true;
            }
        }
        assert!(seen.iter().all(|hit| *hit));
    }
}
