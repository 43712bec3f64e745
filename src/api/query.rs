//! Validation of the `/apr/api` query string.

use chrono::{Duration, NaiveDate, NaiveTime};
use serde::Deserialize;
use thiserror::Error;

use crate::{api::sort::Order, db::models::VebalRound, etl::calendar::calendar_start};

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Query parameters exactly as received. Filters are parsed separately.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AprParams {
    pub pool_id: Option<String>,
    pub start_at: Option<String>,
    pub end_at: Option<String>,
    pub round_id: Option<String>,
    pub sort: Option<String>,
    pub order: Option<String>,
    pub limit: Option<String>,
    pub offset: Option<String>,
}

/// Rejected query parameters, one issue per problem found.
#[derive(Debug, Clone, Error, PartialEq)]
#[error("invalid query parameters: {}", issues.join("; "))]
pub struct QueryError {
    pub issues: Vec<String>,
}

/// Inclusive range of UTC days.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DateWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

/// A validated request.
#[derive(Debug, Clone, PartialEq)]
pub struct AprQuery {
    pub pool_id: Option<String>,
    pub window: DateWindow,
    pub sort: String,
    pub order: Order,
    pub offset: usize,
    /// `None` returns every pool of a day
    pub limit: Option<usize>,
}

fn parse_date(name: &str, value: &str, issues: &mut Vec<String>) -> Option<NaiveDate> {
    match NaiveDate::parse_from_str(value, DATE_FORMAT) {
        Ok(date) => Some(date),
        Err(_) => {
            issues.push(format!("{name} must be a YYYY-MM-DD date, got {value:?}"));
            None
        },
    }
}

fn parse_count(name: &str, value: Option<&str>, issues: &mut Vec<String>) -> usize {
    match value.map(str::parse::<usize>) {
        None => 0,
        Some(Ok(count)) => count,
        Some(Err(_)) => {
            issues.push(format!("{name} must be a non-negative integer, got {:?}", value.unwrap_or_default()));
            0
        },
    }
}

impl AprParams {
    /// Validate against the current UTC day.
    ///
    /// A `poolId` alone covers the pool's full history up to `today`; a
    /// `startAt` without `endAt` runs up to `today`.
    pub fn validate(&self, today: NaiveDate) -> Result<AprQuery, QueryError> {
        let mut issues = Vec::new();

        let pool_id = self.pool_id.clone().filter(|id| !id.trim().is_empty());
        let start_at = self.start_at.as_deref().filter(|s| !s.is_empty());
        let end_at = self.end_at.as_deref().filter(|s| !s.is_empty());
        let round_id = self.round_id.as_deref().filter(|s| !s.is_empty());

        let window = match (round_id, start_at) {
            (Some(_), Some(_)) => {
                issues.push("roundId cannot be combined with startAt/endAt".to_string());
                None
            },
            (Some(round_id), None) => {
                let current = VebalRound::containing(today.and_time(NaiveTime::MIN).and_utc())
                    .map_or(0, |round| round.round_number);
                match round_id.parse::<i32>() {
                    Ok(number) if (1..=current).contains(&number) => {
                        let round = VebalRound::new(number);
                        Some(DateWindow {
                            start: round.start_date.date_naive(),
                            end: round.end_date.date_naive(),
                        })
                    },
                    _ => {
                        issues.push(format!(
                            "roundId must be a round between 1 and {current}, got {round_id:?}"
                        ));
                        None
                    },
                }
            },
            (None, Some(start_at)) => {
                let start = parse_date("startAt", start_at, &mut issues);
                let end = match end_at {
                    Some(end_at) => parse_date("endAt", end_at, &mut issues),
                    None => Some(today),
                };
                match (start, end) {
                    (Some(start), Some(end)) if start > end => {
                        issues.push("startAt must not be after endAt".to_string());
                        None
                    },
                    (Some(start), Some(end)) => Some(DateWindow { start, end }),
                    _ => None,
                }
            },
            (None, None) => {
                if end_at.is_some() {
                    issues.push("endAt requires startAt".to_string());
                }
                if pool_id.is_none() {
                    issues.push("one of poolId, roundId or startAt is required".to_string());
                }
                Some(DateWindow {
                    start: calendar_start().date_naive(),
                    end: today,
                })
            },
        };

        let first_day = calendar_start().date_naive();
        let window = window.and_then(|window| {
            let clamped = window.clamped_to(first_day, today);
            if clamped.is_none() {
                issues.push(format!("window must overlap {first_day}..={today}"));
            }
            clamped
        });

        let order = match self.order.as_deref().filter(|s| !s.is_empty()) {
            None => Order::default(),
            Some(order) => order.parse().unwrap_or_else(|_| {
                issues.push(format!("order must be asc or desc, got {order:?}"));
                Order::default()
            }),
        };

        let offset = parse_count("offset", self.offset.as_deref(), &mut issues);
        let limit = parse_count("limit", self.limit.as_deref(), &mut issues);

        match window {
            Some(window) if issues.is_empty() => Ok(AprQuery {
                pool_id,
                window,
                sort: self.sort.clone().unwrap_or_else(|| "apr".to_string()),
                order,
                offset,
                // 0 or absent means no limit
                limit: (limit > 0).then_some(limit),
            }),
            _ => Err(QueryError { issues }),
        }
    }
}

/// Index of the weekly round containing `day`, counted from round 1.
///
/// Days before round 1 fall in earlier weeks on the same Thursday grid.
fn round_index(day: NaiveDate) -> i64 {
    (day - VebalRound::epoch().date_naive())
        .num_days()
        .div_euclid(7)
}

fn round_start(index: i64) -> NaiveDate {
    VebalRound::epoch().date_naive() + Duration::weeks(index)
}

impl DateWindow {
    /// Days of the window, in order.
    pub fn days(&self) -> impl Iterator<Item = NaiveDate> + '_ {
        self.start
            .iter_days()
            .take_while(move |day| *day <= self.end)
    }

    /// Intersection with `first..=last`, `None` when they do not overlap.
    pub fn clamped_to(self, first: NaiveDate, last: NaiveDate) -> Option<DateWindow> {
        let window = DateWindow {
            start: self.start.max(first),
            end: self.end.min(last),
        };
        (window.start <= window.end).then_some(window)
    }

    /// Split the window at veBAL round boundaries.
    pub fn round_units(&self) -> Vec<DateWindow> {
        let mut units = Vec::new();
        let mut start = self.start;
        while start <= self.end {
            let round_end = round_start(round_index(start) + 1) - Duration::days(1);
            let end = round_end.min(self.end);
            units.push(DateWindow { start, end });
            start = end + Duration::days(1);
        }
        units
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, DATE_FORMAT).unwrap()
    }

    fn today() -> NaiveDate {
        date("2023-06-15")
    }

    fn params(pairs: &[(&str, &str)]) -> AprParams {
        let object = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), serde_json::Value::from(*v)))
            .collect();
        serde_json::from_value(serde_json::Value::Object(object)).unwrap()
    }

    #[test]
    fn test_date_window() {
        let query = params(&[("startAt", "2023-06-01"), ("endAt", "2023-06-10"), ("limit", "5")])
            .validate(today())
            .unwrap();

        assert_eq!(
            query.window,
            DateWindow {
                start: date("2023-06-01"),
                end: date("2023-06-10")
            }
        );
        assert_eq!(query.limit, Some(5));
        assert_eq!(query.offset, 0);
        assert_eq!(query.sort, "apr");
        assert_eq!(query.order, Order::Desc);
    }

    #[test]
    fn test_round_window() {
        let query = params(&[("roundId", "1"), ("poolId", "0xpool")])
            .validate(today())
            .unwrap();

        assert_eq!(query.window.start, date("2022-04-14"));
        assert_eq!(query.window.end, date("2022-04-20"));
        assert_eq!(query.pool_id.as_deref(), Some("0xpool"));
    }

    #[test]
    fn test_pool_id_alone_covers_full_history() {
        let query = params(&[("poolId", "0xpool")]).validate(today()).unwrap();
        assert_eq!(query.window.start, date("2021-04-21"));
        assert_eq!(query.window.end, today());
    }

    #[test]
    fn test_invalid_parameters_are_collected() {
        let error = params(&[("startAt", "2023-06-01"), ("limit", "abc"), ("order", "up")])
            .validate(today())
            .unwrap_err();

        assert_eq!(error.issues.len(), 2);
        assert!(error.issues[0].contains("order"));
        assert!(error.issues[1].contains("limit"));
    }

    #[test]
    fn test_missing_selector_is_rejected() {
        let error = params(&[("sort", "tvl")]).validate(today()).unwrap_err();
        assert_eq!(error.issues, vec!["one of poolId, roundId or startAt is required"]);

        assert!(params(&[("roundId", "0")]).validate(today()).is_err());
        assert!(params(&[("startAt", "2023-06-10"), ("endAt", "2023-06-01")])
            .validate(today())
            .is_err());
    }

    #[test]
    fn test_round_id_after_current_round_is_rejected() {
        // 2023-06-15 falls in round 62
        assert!(params(&[("roundId", "62")]).validate(today()).is_ok());
        assert!(params(&[("roundId", "63")]).validate(today()).is_err());

        let error = params(&[("roundId", "2000000000")])
            .validate(today())
            .unwrap_err();
        assert_eq!(error.issues.len(), 1);
        assert!(error.issues[0].contains("roundId"));
    }

    #[test]
    fn test_window_is_clamped_to_calendar() {
        let query = params(&[("startAt", "0001-01-01"), ("endAt", "9999-12-31")])
            .validate(today())
            .unwrap();

        assert_eq!(query.window.start, date("2021-04-21"));
        assert_eq!(query.window.end, today());
        assert!(query.window.round_units().len() < 120);

        let error = params(&[("startAt", "2030-01-01"), ("endAt", "2031-01-01")])
            .validate(today())
            .unwrap_err();
        assert_eq!(error.issues, vec!["window must overlap 2021-04-21..=2023-06-15"]);
    }

    #[test]
    fn test_round_units_split_on_thursdays() {
        // 2023-06-01 is a Thursday, a round boundary
        let window = DateWindow {
            start: date("2023-05-30"),
            end: date("2023-06-09"),
        };

        assert_eq!(
            window.round_units(),
            vec![
                DateWindow {
                    start: date("2023-05-30"),
                    end: date("2023-05-31")
                },
                DateWindow {
                    start: date("2023-06-01"),
                    end: date("2023-06-07")
                },
                DateWindow {
                    start: date("2023-06-08"),
                    end: date("2023-06-09")
                },
            ]
        );
        assert_eq!(window.days().count(), 11);
    }

    #[test]
    fn test_round_units_before_first_round() {
        let window = DateWindow {
            start: date("2022-04-10"),
            end: date("2022-04-15"),
        };
        let units = window.round_units();

        assert_eq!(units.len(), 2);
        assert_eq!(units[0].end, date("2022-04-13"));
        assert_eq!(units[1].start, date("2022-04-14"));
    }
}
