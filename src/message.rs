use serde::{Deserialize, Serialize};
use std::fmt;

/// The commit unit: one record's position within a topic partition.
///
/// One of these exists per successfully polled record; it is the only
/// state carried from poll to commit, and it is handed to the message
/// handler so failures can be logged and correlated with a position in
/// the log.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TopicPartitionOffset {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
}

impl TopicPartitionOffset {
    pub fn new(topic: impl Into<String>, partition: i32, offset: i64) -> Self {
        Self {
            topic: topic.into(),
            partition,
            offset,
        }
    }
}

impl fmt::Display for TopicPartitionOffset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}] @{}", self.topic, self.partition, self.offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_format() {
        let offset = TopicPartitionOffset::new("orders", 3, 42);
        assert_eq!(offset.to_string(), "orders [3] @42");
    }
}
