use chrono::{DateTime, Duration, DurationRound, TimeZone, Utc};
use log::warn;

use crate::db::models::{PoolSnapshot, SubgraphPoolSnapshot};

/// First day of the daily snapshot calendar.
pub fn calendar_start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2021, 4, 21, 0, 0, 0)
        .single()
        .unwrap_or_default()
}

/// UTC midnight at or after `time`.
fn first_day_at_or_after(time: DateTime<Utc>) -> DateTime<Utc> {
    match time.duration_trunc(Duration::days(1)) {
        Ok(day) if day == time => day,
        Ok(day) => day + Duration::days(1),
        Err(_) => time,
    }
}

/// Project raw snapshots onto a daily calendar, per pool.
///
/// Each raw snapshot is valid on `[timestamp, next snapshot's timestamp)`,
/// the last one until `now`. Every calendar day from [`calendar_start`] up to
/// today takes the snapshot valid at its midnight. Days before a pool's first
/// snapshot get no row.
pub fn fill_daily_calendar(
    mut raw: Vec<SubgraphPoolSnapshot>,
    now: DateTime<Utc>,
) -> Vec<PoolSnapshot> {
    raw.retain(|snapshot| match snapshot.time() {
        Ok(_) => true,
        Err(e) => {
            warn!("{:#}", e);
            false
        },
    });
    raw.sort_by(|a, b| {
        a.pool
            .id
            .cmp(&b.pool.id)
            .then(a.timestamp.cmp(&b.timestamp))
    });

    let start = calendar_start();
    let mut daily = Vec::new();

    for (i, snapshot) in raw.iter().enumerate() {
        let Ok(valid_from) = snapshot.time() else {
            continue;
        };
        let valid_until = match raw.get(i + 1) {
            Some(next) if next.pool.id == snapshot.pool.id => next.time().unwrap_or(now),
            _ => now,
        };

        let mut day = first_day_at_or_after(valid_from).max(start);
        while day < valid_until && day <= now {
            daily.push(PoolSnapshot::from_raw(snapshot, day));
            day += Duration::days(1);
        }
    }

    daily
}
