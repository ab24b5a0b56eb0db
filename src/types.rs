/// A single partition of a topic, the unit of ordering and of worker ownership.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Partition {
    topic: String,
    partition_number: i32,
}

impl Partition {
    pub fn new(topic: String, partition_number: i32) -> Self {
        Self {
            topic,
            partition_number,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn partition_number(&self) -> i32 {
        self.partition_number
    }
}

impl std::fmt::Display for Partition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.topic, self.partition_number)
    }
}

/// A position within a partition. When used for commits this holds the *next*
/// offset to consume (last processed + 1), matching the broker convention.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PartitionOffset {
    partition: Partition,
    offset: i64,
}

impl PartitionOffset {
    pub fn new(partition: Partition, offset: i64) -> Self {
        Self { partition, offset }
    }

    pub fn partition(&self) -> &Partition {
        &self.partition
    }

    pub fn topic(&self) -> &str {
        self.partition.topic()
    }

    pub fn partition_number(&self) -> i32 {
        self.partition.partition_number()
    }

    pub fn offset(&self) -> i64 {
        self.offset
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partition_ordering_is_stable() {
        let mut partitions = vec![
            Partition::new("b-topic".to_string(), 1),
            Partition::new("a-topic".to_string(), 2),
            Partition::new("a-topic".to_string(), 0),
        ];
        partitions.sort();

        assert_eq!(partitions[0], Partition::new("a-topic".to_string(), 0));
        assert_eq!(partitions[1], Partition::new("a-topic".to_string(), 2));
        assert_eq!(partitions[2], Partition::new("b-topic".to_string(), 1));
    }

    #[test]
    fn test_partition_display() {
        let partition = Partition::new("events".to_string(), 3);
        assert_eq!(partition.to_string(), "events:3");
    }
}
