use chrono::{DateTime, Duration, TimeZone, Utc};

/// Weekly veBAL voting round (PostgreSQL)
///
/// Unique Key: round_number
/// Rounds are fixed 7-day windows starting 2022-04-14T00:00Z. A round ends
/// one millisecond before the next one starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VebalRound {
    pub round_number: i32,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
}

impl VebalRound {
    /// Start of round 1.
    pub fn epoch() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2022, 4, 14, 0, 0, 0)
            .single()
            .unwrap_or_default()
    }

    pub fn new(round_number: i32) -> Self {
        let start_date = Self::epoch() + Duration::weeks(i64::from(round_number - 1));
        let end_date = start_date + Duration::weeks(1) - Duration::milliseconds(1);
        Self {
            round_number,
            start_date,
            end_date,
        }
    }

    /// Round containing `time`, or `None` before round 1.
    pub fn containing(time: DateTime<Utc>) -> Option<Self> {
        let elapsed = time - Self::epoch();
        if elapsed < Duration::zero() {
            return None;
        }
        let index = elapsed.num_milliseconds() / Duration::weeks(1).num_milliseconds();
        i32::try_from(index + 1).ok().map(Self::new)
    }

    /// Every round whose start is at or before `now`, starting from round 1.
    pub fn generate_until(now: DateTime<Utc>) -> Vec<Self> {
        let mut rounds = Vec::new();
        let mut round = Self::new(1);
        while round.start_date <= now {
            let next = round.round_number + 1;
            rounds.push(round);
            round = Self::new(next);
        }
        rounds
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_round_bounds() {
        let round = VebalRound::new(1);
        assert_eq!(round.start_date.to_rfc3339(), "2022-04-14T00:00:00+00:00");
        assert_eq!(
            round.end_date.format("%Y-%m-%dT%H:%M:%S%.3f").to_string(),
            "2022-04-20T23:59:59.999"
        );
    }

    #[test]
    fn test_generate_until_includes_round_starting_now() {
        let now = Utc.with_ymd_and_hms(2022, 4, 28, 0, 0, 0).unwrap();
        let rounds = VebalRound::generate_until(now);

        assert_eq!(rounds.len(), 3);
        assert_eq!(rounds[2].round_number, 3);
        assert_eq!(rounds[2].start_date, now);
    }

    #[test]
    fn test_generate_before_epoch_is_empty() {
        let now = Utc.with_ymd_and_hms(2022, 1, 1, 0, 0, 0).unwrap();
        assert!(VebalRound::generate_until(now).is_empty());
    }

    #[test]
    fn test_containing_resolves_interval() {
        let last_ms_of_round_1 = Utc.with_ymd_and_hms(2022, 4, 20, 23, 59, 59).unwrap()
            + Duration::milliseconds(999);
        assert_eq!(VebalRound::containing(last_ms_of_round_1).unwrap().round_number, 1);

        let start_of_round_2 = Utc.with_ymd_and_hms(2022, 4, 21, 0, 0, 0).unwrap();
        let round = VebalRound::containing(start_of_round_2).unwrap();
        assert_eq!(round.round_number, 2);
        assert_eq!(round.start_date, start_of_round_2);

        let before = Utc.with_ymd_and_hms(2022, 4, 13, 0, 0, 0).unwrap();
        assert!(VebalRound::containing(before).is_none());
    }
}
