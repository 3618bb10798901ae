/// 在场人数统计 (Presence counting)
///
/// - Aggregator: 活跃身份数 → 人数, 变化时写事件
/// - StaleMemory: 显示用的最后出现帧记录, 独立于跟踪过期
pub mod aggregator;
pub mod stale;

pub use aggregator::{PresenceAggregator, PresenceChange};
pub use stale::StaleMemory;

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 事件方向
///
/// Only `PRESENT` is ever produced: events record presence-count snapshots,
/// not line crossings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    #[serde(rename = "PRESENT")]
    Present,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Present => "PRESENT",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PRESENT" => Ok(Direction::Present),
            other => Err(format!("unknown direction: {}", other)),
        }
    }
}

/// 人数变化事件 (创建后不可变)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CountEvent {
    pub direction: Direction,
    pub lobby_count: u32,
    pub timestamp: DateTime<Utc>,
}

impl CountEvent {
    pub fn present(lobby_count: u32, timestamp: DateTime<Utc>) -> Self {
        Self {
            direction: Direction::Present,
            lobby_count,
            timestamp,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direction_round_trips_through_str() {
        assert_eq!("PRESENT".parse::<Direction>().unwrap(), Direction::Present);
        assert!("IN".parse::<Direction>().is_err());
    }

    #[test]
    fn test_count_event_serializes_sentinel() {
        let event = CountEvent::present(3, Utc::now());
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["direction"], "PRESENT");
        assert_eq!(json["lobby_count"], 3);
    }
}
