//! BAL emission schedule.

/// Unix time at which BAL emissions through gauges started.
pub const START_EPOCH_TIME: i64 = 1_648_465_251;

const INITIAL_WEEKLY_EMISSION: f64 = 145_000.0;
const RATE_REDUCTION_TIME: i64 = 365 * 86_400;

/// Emission epoch (in years) of `timestamp`.
pub fn epoch(timestamp: i64) -> anyhow::Result<i64> {
    if timestamp < START_EPOCH_TIME {
        anyhow::bail!(
            "Timestamp {} is before BAL emissions started at {}",
            timestamp,
            START_EPOCH_TIME
        );
    }
    Ok((timestamp - START_EPOCH_TIME) / RATE_REDUCTION_TIME)
}

/// Weekly BAL emission at `timestamp`: halves every four years, stepping
/// down by 2^(1/4) each year.
pub fn weekly(timestamp: i64) -> anyhow::Result<f64> {
    let epoch = epoch(timestamp)?;
    Ok(INITIAL_WEEKLY_EMISSION / 2f64.powf(epoch as f64 / 4.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_epoch() {
        assert_eq!(weekly(START_EPOCH_TIME).unwrap(), 145_000.0);
        assert_eq!(weekly(START_EPOCH_TIME + RATE_REDUCTION_TIME - 1).unwrap(), 145_000.0);
    }

    #[test]
    fn test_yearly_reduction() {
        let one_year_later = weekly(START_EPOCH_TIME + RATE_REDUCTION_TIME).unwrap();
        assert!((one_year_later - 145_000.0 / 2f64.powf(0.25)).abs() < 1e-9);

        let four_years_later = weekly(START_EPOCH_TIME + 4 * RATE_REDUCTION_TIME).unwrap();
        assert!((four_years_later - 72_500.0).abs() < 1e-9);
    }

    #[test]
    fn test_before_start_is_an_error() {
        assert!(weekly(START_EPOCH_TIME - 1).is_err());
    }
}
