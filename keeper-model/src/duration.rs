use chrono::DateTime;
use chrono::Duration as ChronoDuration;
use chrono::NaiveDate;
use chrono::TimeZone;
use chrono::Utc;

use crate::error::ModelError;
use crate::error::ModelResult;

/// Resolve a `since`/`until` input (spec §6.4) to an absolute UTC instant.
///
/// Accepts either a bare date (`YYYY-MM-DD`, midnight UTC) or an ISO 8601
/// duration token (`P7D`, `P1W`, `PT1H`, `P1DT12H`), interpreted as "that far
/// before `now`".
pub fn resolve_time_bound(token: &str, now: DateTime<Utc>) -> ModelResult<DateTime<Utc>> {
    if let Ok(date) = NaiveDate::parse_from_str(token, "%Y-%m-%d") {
        return Ok(Utc
            .from_utc_datetime(&date.and_hms_opt(0, 0, 0).expect("midnight is valid")));
    }

    if let Some(duration) = parse_iso8601_duration(token) {
        return Ok(now - duration);
    }

    Err(ModelError::InvalidDuration(token.to_string()))
}

/// Parse a (restricted) ISO 8601 duration: `P[n Y][n M][n W][n D][T[n H][n M][n S]]`.
/// Years and months are approximated as 365 and 30 days respectively, which
/// is adequate for the recency windows the engine uses them for.
fn parse_iso8601_duration(token: &str) -> Option<ChronoDuration> {
    let rest = token.strip_prefix('P')?;
    let (date_part, time_part) = match rest.split_once('T') {
        Some((d, t)) => (d, Some(t)),
        None => (rest, None),
    };

    let mut total = ChronoDuration::zero();
    let mut saw_component = false;

    let mut number = String::new();
    for ch in date_part.chars() {
        if ch.is_ascii_digit() {
            number.push(ch);
            continue;
        }
        let value: i64 = number.parse().ok()?;
        number.clear();
        saw_component = true;
        total = total
            + match ch {
                'Y' => ChronoDuration::days(value * 365),
                'M' => ChronoDuration::days(value * 30),
                'W' => ChronoDuration::weeks(value),
                'D' => ChronoDuration::days(value),
                _ => return None,
            };
    }
    if !number.is_empty() {
        return None;
    }

    if let Some(time_part) = time_part {
        let mut number = String::new();
        for ch in time_part.chars() {
            if ch.is_ascii_digit() {
                number.push(ch);
                continue;
            }
            let value: i64 = number.parse().ok()?;
            number.clear();
            saw_component = true;
            total = total
                + match ch {
                    'H' => ChronoDuration::hours(value),
                    'M' => ChronoDuration::minutes(value),
                    'S' => ChronoDuration::seconds(value),
                    _ => return None,
                };
        }
        if !number.is_empty() {
            return None;
        }
    }

    saw_component.then_some(total)
}
