use anyhow::{anyhow, Result};
use chrono::{
    DateTime, Duration, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc,
};
use chrono_tz::Tz;

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%d-%b-%Y", "%Y/%m/%d", "%d.%m.%Y"];
const CLOCK_FORMATS: &[&str] = &["%H:%M:%S%.f", "%H:%M"];
const BOUND_DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
];

/// Which end of a date range a user-supplied bound describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bound {
    Start,
    End,
}

/// Build the instant of a log line from its bracketed stamp.
///
/// The stamp is `<date> <clock>[ <zone>]`. Dashes in the clock are read as `:`. The zone may
/// also be attached to the clock (`10:00:00+01:00`, `10:00:00Z`) or follow it as a separate
/// token (`10:00:00 Europe/Prague`, `14:02:11 UTC`). Zone-less stamps are read in `default_tz`.
pub fn parse_log_timestamp(stamp: &str, default_tz: Tz) -> Option<DateTime<Utc>> {
    let mut tokens = stamp.split_whitespace();
    let date = parse_date(tokens.next()?)?;
    let clock_token = tokens.next()?.replace('-', ":");
    let zone_token = tokens.next();
    if tokens.next().is_some() {
        return None;
    }

    let (clock, attached_zone) = split_attached_zone(&clock_token);
    let zone = match (attached_zone, zone_token) {
        (Some(_), Some(_)) => return None,
        (Some(zone), None) | (None, Some(zone)) => Some(zone),
        (None, None) => None,
    };

    let naive = date.and_time(parse_clock(clock)?);
    resolve_zone(naive, zone, default_tz)
}

/// Parse a `--since`/`--until` style bound.
///
/// Accepts `now`, RFC 3339, `YYYY-MM-DD[ HH:MM[:SS]]` in `tz`, or a relative duration such as
/// `24h` meaning "that long ago". A bare date covers the whole day: midnight for a start bound,
/// the last millisecond of the day for an end bound.
pub fn parse_bound(input: &str, tz: Tz, bound: Bound) -> Result<DateTime<Utc>> {
    let input = input.trim();

    if input.eq_ignore_ascii_case("now") {
        return Ok(Utc::now());
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(input) {
        return Ok(dt.with_timezone(&Utc));
    }

    for format in BOUND_DATETIME_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(input, format) {
            return localize(&tz, naive)
                .ok_or_else(|| anyhow!("'{}' does not exist in time zone {}", input, tz));
        }
    }

    if let Ok(date) = NaiveDate::parse_from_str(input, "%Y-%m-%d") {
        let clock = match bound {
            Bound::Start => NaiveTime::MIN,
            Bound::End => NaiveTime::from_hms_milli_opt(23, 59, 59, 999)
                .ok_or_else(|| anyhow!("invalid end-of-day time"))?,
        };
        return localize(&tz, date.and_time(clock))
            .ok_or_else(|| anyhow!("'{}' does not exist in time zone {}", input, tz));
    }

    if let Ok(ago) = humantime::parse_duration(input) {
        let ago = Duration::from_std(ago)
            .map_err(|_| anyhow!("duration '{}' is out of range", input))?;
        return Utc::now()
            .checked_sub_signed(ago)
            .ok_or_else(|| anyhow!("duration '{}' is out of range", input));
    }

    Err(anyhow!(
        "cannot parse '{}' as a date, date-time or duration (e.g. 2024-01-31, '2024-01-31 12:00', 24h)",
        input
    ))
}

/// Render an instant for terminal output in the configured zone.
pub fn format_timestamp(dt: &DateTime<Utc>, tz: Tz) -> String {
    dt.with_timezone(&tz).format("%Y-%m-%d %H:%M:%S").to_string()
}

fn parse_date(input: &str) -> Option<NaiveDate> {
    DATE_FORMATS
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(input, format).ok())
}

fn parse_clock(input: &str) -> Option<NaiveTime> {
    CLOCK_FORMATS
        .iter()
        .find_map(|format| NaiveTime::parse_from_str(input, format).ok())
}

fn split_attached_zone(token: &str) -> (&str, Option<&str>) {
    if let Some(clock) = token
        .strip_suffix('Z')
        .or_else(|| token.strip_suffix('z'))
    {
        return (clock, Some("Z"));
    }
    match token.find('+') {
        Some(pos) => (&token[..pos], Some(&token[pos..])),
        None => (token, None),
    }
}

fn resolve_zone(naive: NaiveDateTime, zone: Option<&str>, default_tz: Tz) -> Option<DateTime<Utc>> {
    let Some(zone) = zone else {
        return localize(&default_tz, naive);
    };

    if ["Z", "UTC", "GMT"]
        .iter()
        .any(|name| zone.eq_ignore_ascii_case(name))
    {
        return Some(naive.and_utc());
    }

    if zone.starts_with('+') || zone.starts_with('-') {
        return localize(&parse_offset(zone)?, naive);
    }

    let tz: Tz = zone.parse().ok()?;
    localize(&tz, naive)
}

fn parse_offset(zone: &str) -> Option<FixedOffset> {
    let (sign, rest) = match zone.as_bytes().first()? {
        b'+' => (1, &zone[1..]),
        b'-' => (-1, &zone[1..]),
        _ => return None,
    };
    let digits: String = rest.chars().filter(|c| *c != ':').collect();
    if !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let (hours, minutes) = match digits.len() {
        2 => (digits.parse::<i32>().ok()?, 0),
        4 => (digits[..2].parse::<i32>().ok()?, digits[2..].parse::<i32>().ok()?),
        _ => return None,
    };
    if minutes >= 60 {
        return None;
    }
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
}

fn localize<T: TimeZone>(tz: &T, naive: NaiveDateTime) -> Option<DateTime<Utc>> {
    tz.from_local_datetime(&naive)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
}
