//! Partition-to-worker assignment strategies.
//!
//! A strategy maps the consumer's current partition set onto worker indexes.
//! All partitions of the same `Partition` key always land on the same worker,
//! which is what preserves per-partition ordering across the pool.

use std::collections::HashMap;

use crate::types::Partition;

/// Deterministic mapping of partitions to worker slots. Implementations must
/// produce the same output for the same `(partitions, worker_count)` inputs,
/// regardless of input order.
pub trait DistributionStrategy: Send + Sync {
    fn assign(&self, partitions: &[Partition], worker_count: usize) -> HashMap<Partition, usize>;
}

/// Default strategy: sort partitions and deal them out round-robin. Spreads
/// load evenly whenever partition count >= worker count.
#[derive(Debug, Default)]
pub struct RoundRobinDistribution;

impl DistributionStrategy for RoundRobinDistribution {
    fn assign(&self, partitions: &[Partition], worker_count: usize) -> HashMap<Partition, usize> {
        if worker_count == 0 {
            return HashMap::new();
        }
        let mut sorted: Vec<&Partition> = partitions.iter().collect();
        sorted.sort();
        sorted
            .into_iter()
            .enumerate()
            .map(|(i, partition)| (partition.clone(), i % worker_count))
            .collect()
    }
}

/// Hash-based strategy: a stable FNV-1a hash of topic and partition number
/// picks the worker. Keeps a partition on the same worker slot across
/// rebalances that change the rest of the assignment.
#[derive(Debug, Default)]
pub struct KeyHashDistribution;

// FNV-1a, hand-rolled so the mapping is stable across runs and platforms
// (std's SipHash is randomly seeded per process).
fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in bytes {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

impl DistributionStrategy for KeyHashDistribution {
    fn assign(&self, partitions: &[Partition], worker_count: usize) -> HashMap<Partition, usize> {
        if worker_count == 0 {
            return HashMap::new();
        }
        partitions
            .iter()
            .map(|partition| {
                let mut bytes = partition.topic().as_bytes().to_vec();
                bytes.extend_from_slice(&partition.partition_number().to_be_bytes());
                let slot = (fnv1a(&bytes) % worker_count as u64) as usize;
                (partition.clone(), slot)
            })
            .collect()
    }
}
