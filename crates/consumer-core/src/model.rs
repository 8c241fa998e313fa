use chrono::{DateTime, Utc};
use std::fmt;
use std::str::FromStr;

/// Where a group with no committed offsets starts reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OffsetReset {
    #[default]
    Earliest,
    Latest,
}

impl OffsetReset {
    pub fn as_str(self) -> &'static str {
        match self {
            OffsetReset::Earliest => "earliest",
            OffsetReset::Latest => "latest",
        }
    }
}

impl FromStr for OffsetReset {
    type Err = &'static str;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "earliest" => Ok(OffsetReset::Earliest),
            "latest" => Ok(OffsetReset::Latest),
            _ => Err("unsupported offset reset policy"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionOffset {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
}

impl PartitionOffset {
    pub fn new(topic: impl Into<String>, partition: i32, offset: i64) -> Self {
        Self {
            topic: topic.into(),
            partition,
            offset,
        }
    }
}

impl fmt::Display for PartitionOffset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [[{}]] @{}", self.topic, self.partition, self.offset)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub value: Option<String>,
    pub position: PartitionOffset,
    pub timestamp: Option<DateTime<Utc>>,
}

impl Message {
    pub fn new(value: impl Into<String>, position: PartitionOffset) -> Self {
        Self {
            value: Some(value.into()),
            position,
            timestamp: None,
        }
    }

    pub fn value_or_empty(&self) -> &str {
        self.value.as_deref().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offset_reset_parses_case_insensitively() {
        assert_eq!(
            OffsetReset::from_str(" Earliest ").unwrap(),
            OffsetReset::Earliest
        );
        assert_eq!(OffsetReset::from_str("LATEST").unwrap(), OffsetReset::Latest);
        assert!(OffsetReset::from_str("beginning").is_err());
        assert_eq!(OffsetReset::default().as_str(), "earliest");
    }

    #[test]
    fn partition_offset_renders_position_token() {
        let position = PartitionOffset::new("my-topic", 2, 41);
        assert_eq!(position.to_string(), "my-topic [[2]] @41");
    }

    #[test]
    fn missing_value_reads_as_empty() {
        let mut message = Message::new("a", PartitionOffset::new("t", 0, 1));
        assert_eq!(message.value_or_empty(), "a");
        message.value = None;
        assert_eq!(message.value_or_empty(), "");
    }
}
