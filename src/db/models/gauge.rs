use chrono::{DateTime, Utc};

/// veBAL gauge attached to a pool (PostgreSQL)
///
/// Unique Key: (address, pool_external_id)
/// Gauges missing from the latest voting-list extraction are hard-deleted.
#[derive(Debug, Clone, PartialEq)]
pub struct Gauge {
    pub address: String,
    pub pool_external_id: String,
    pub is_killed: bool,
    pub external_created_at: Option<DateTime<Utc>>,
    pub network_slug: String,
}

/// Gauge voting weight at the start of a veBAL round (PostgreSQL)
///
/// Unique Key: (gauge_address, round_number)
/// `relative_weight` is the gauge controller's weight normalised to [0, 1].
#[derive(Debug, Clone, PartialEq)]
pub struct GaugeSnapshot {
    pub gauge_address: String,
    pub timestamp: DateTime<Utc>,
    pub relative_weight: f64,
    pub round_number: i32,
}

impl Gauge {
    /// Picks the gauge used for a pool's veBAL APR when a pool has several:
    /// a live gauge beats a killed one, then the most recently added wins.
    pub fn preferred<'a>(gauges: &'a [Gauge]) -> Option<&'a Gauge> {
        gauges
            .iter()
            .max_by_key(|gauge| (!gauge.is_killed, gauge.external_created_at))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gauge(address: &str, is_killed: bool, created: i64) -> Gauge {
        Gauge {
            address: address.to_string(),
            pool_external_id: "0xpool".to_string(),
            is_killed,
            external_created_at: DateTime::from_timestamp(created, 0),
            network_slug: "ethereum".to_string(),
        }
    }

    #[test]
    fn test_preferred_gauge_skips_killed() {
        let gauges = vec![
            gauge("0xnew-killed", true, 300),
            gauge("0xlive", false, 100),
            gauge("0xold-killed", true, 50),
        ];
        assert_eq!(Gauge::preferred(&gauges).unwrap().address, "0xlive");
    }

    #[test]
    fn test_preferred_gauge_newest_live() {
        let gauges = vec![gauge("0xa", false, 100), gauge("0xb", false, 200)];
        assert_eq!(Gauge::preferred(&gauges).unwrap().address, "0xb");
        assert!(Gauge::preferred(&[]).is_none());
    }
}
