//! Epoch value normalization for callers that send timestamps.
//!
//! Browser clients historically sent milliseconds where the store expects
//! seconds. The wire should say which unit it uses; the magnitude check is
//! only a fallback for legacy callers that do not.

use serde::{Deserialize, Serialize};

/// Values above this are assumed to be milliseconds when no unit is given.
pub const LEGACY_MILLIS_THRESHOLD: i64 = 167_372_820_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EpochUnit {
    Seconds,
    Millis,
}

/// Converts a wire epoch value to whole seconds.
pub fn to_epoch_seconds(value: i64, unit: Option<EpochUnit>) -> i64 {
    let unit = unit.unwrap_or_else(|| guess_unit(value));
    match unit {
        EpochUnit::Seconds => value,
        EpochUnit::Millis => (value as f64 / 1000.0).round() as i64,
    }
}

fn guess_unit(value: i64) -> EpochUnit {
    if value > LEGACY_MILLIS_THRESHOLD {
        log::warn!(
            "event=epoch_unit_guess module=schedule status=ok unit=millis value={}",
            value
        );
        EpochUnit::Millis
    } else {
        EpochUnit::Seconds
    }
}

#[cfg(test)]
mod tests {
    use super::{to_epoch_seconds, EpochUnit, LEGACY_MILLIS_THRESHOLD};

    #[test]
    fn explicit_unit_wins_over_magnitude() {
        assert_eq!(
            to_epoch_seconds(1_700_000_000_000, Some(EpochUnit::Seconds)),
            1_700_000_000_000
        );
        assert_eq!(
            to_epoch_seconds(1_700_000_000, Some(EpochUnit::Millis)),
            1_700_000
        );
    }

    #[test]
    fn legacy_fallback_uses_threshold() {
        assert_eq!(to_epoch_seconds(1_700_000_000, None), 1_700_000_000);
        assert_eq!(to_epoch_seconds(1_700_000_000_400, None), 1_700_000_000);
        assert_eq!(
            to_epoch_seconds(LEGACY_MILLIS_THRESHOLD, None),
            LEGACY_MILLIS_THRESHOLD
        );
    }
}
