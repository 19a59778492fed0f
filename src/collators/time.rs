use super::ParamsCollator;
use crate::delivery::{DeliveryRequest, RequestDetails};
use serde_json::{Map, Value};
use std::time::{SystemTime, UNIX_EPOCH};

pub const CURRENT_TIMESTAMP: &str = "current_timestamp";
pub const CURRENT_DAY: &str = "current_day";
pub const CURRENT_TIME: &str = "current_time";

const MS_PER_DAY: u64 = 86_400_000;

/// Clock facts, all UTC: epoch millis, ISO weekday (1 = Monday), and the
/// wall time as an `HHmm` string.
#[derive(Default)]
pub struct TimeParamsCollator;

impl TimeParamsCollator {
    pub fn collate_at(now_ms: u64) -> Map<String, Value> {
        let mut time = Map::new();
        time.insert(CURRENT_TIMESTAMP.to_string(), Value::from(now_ms));

        // 1970-01-01 was a Thursday.
        let days = now_ms / MS_PER_DAY;
        let weekday = (days + 3) % 7 + 1;
        time.insert(CURRENT_DAY.to_string(), Value::from(weekday.to_string()));

        let seconds_of_day = (now_ms / 1000) % 86_400;
        let hhmm = format!("{:02}{:02}", seconds_of_day / 3600, (seconds_of_day % 3600) / 60);
        time.insert(CURRENT_TIME.to_string(), Value::from(hhmm));

        time
    }
}

impl ParamsCollator for TimeParamsCollator {
    fn collate(
        &self,
        _request: &DeliveryRequest,
        _details: Option<&RequestDetails<'_>>,
    ) -> Map<String, Value> {
        let now_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        Self::collate_at(now_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_instant() {
        // 2020-03-18 14:42:00 UTC, a Wednesday.
        let params = TimeParamsCollator::collate_at(1_584_542_520_000);
        assert_eq!(params[CURRENT_TIMESTAMP], Value::from(1_584_542_520_000u64));
        assert_eq!(params[CURRENT_DAY], Value::from("3"));
        assert_eq!(params[CURRENT_TIME], Value::from("1442"));
    }

    #[test]
    fn test_epoch_is_thursday() {
        let params = TimeParamsCollator::collate_at(0);
        assert_eq!(params[CURRENT_DAY], Value::from("4"));
        assert_eq!(params[CURRENT_TIME], Value::from("0000"));
    }
}
