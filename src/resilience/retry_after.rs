//! `Retry-After` header parsing.

use std::time::Duration;

use chrono::{DateTime, NaiveDateTime, Utc};
use http::{HeaderMap, StatusCode};

/// Statuses whose `Retry-After` is honoured.
pub fn honours_retry_after(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status == StatusCode::SERVICE_UNAVAILABLE
}

/// Parse a `Retry-After` value as delay-seconds or an HTTP-date.
///
/// Dates in the past yield zero.
pub fn parse_retry_after(value: &str, now: DateTime<Utc>) -> Option<Duration> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }

    if value.bytes().all(|b| b.is_ascii_digit()) {
        return value.parse::<u64>().ok().map(Duration::from_secs);
    }

    let at = parse_http_date(value)?;
    Some((at - now).to_std().unwrap_or(Duration::ZERO))
}

/// Server hint from a response's headers, capped at `max`.
pub fn retry_after_hint(
    status: StatusCode,
    headers: &HeaderMap,
    max: Duration,
    now: DateTime<Utc>,
) -> Option<Duration> {
    if !honours_retry_after(status) {
        return None;
    }
    let value = headers.get(http::header::RETRY_AFTER)?.to_str().ok()?;
    parse_retry_after(value, now).map(|d| d.min(max))
}

fn parse_http_date(value: &str) -> Option<DateTime<Utc>> {
    // IMF-fixdate: Sun, 06 Nov 1994 08:49:37 GMT
    if let Ok(dt) = DateTime::parse_from_rfc2822(value) {
        return Some(dt.with_timezone(&Utc));
    }
    // RFC 850: Sunday, 06-Nov-94 08:49:37 GMT
    if let Ok(dt) = NaiveDateTime::parse_from_str(value, "%A, %d-%b-%y %H:%M:%S GMT") {
        return Some(dt.and_utc());
    }
    // asctime: Sun Nov  6 08:49:37 1994
    if let Ok(dt) = NaiveDateTime::parse_from_str(value, "%a %b %e %H:%M:%S %Y") {
        return Some(dt.and_utc());
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(1994, 11, 6, 8, 49, 0).unwrap()
    }

    #[test]
    fn test_seconds_form() {
        assert_eq!(parse_retry_after("120", now()), Some(Duration::from_secs(120)));
        assert_eq!(parse_retry_after(" 0 ", now()), Some(Duration::ZERO));
    }

    #[test]
    fn test_date_forms() {
        let expected = Some(Duration::from_secs(37));
        assert_eq!(parse_retry_after("Sun, 06 Nov 1994 08:49:37 GMT", now()), expected);
        assert_eq!(parse_retry_after("Sunday, 06-Nov-94 08:49:37 GMT", now()), expected);
        assert_eq!(parse_retry_after("Sun Nov  6 08:49:37 1994", now()), expected);
    }

    #[test]
    fn test_past_date_floors_at_zero() {
        assert_eq!(
            parse_retry_after("Sun, 06 Nov 1994 08:00:00 GMT", now()),
            Some(Duration::ZERO)
        );
    }

    #[test]
    fn test_garbage_is_ignored() {
        assert_eq!(parse_retry_after("", now()), None);
        assert_eq!(parse_retry_after("-5", now()), None);
        assert_eq!(parse_retry_after("soon", now()), None);
    }

    #[test]
    fn test_hint_only_for_429_and_503() {
        let mut headers = HeaderMap::new();
        headers.insert(http::header::RETRY_AFTER, "90".parse().unwrap());
        let cap = Duration::from_secs(30);

        assert_eq!(
            retry_after_hint(StatusCode::SERVICE_UNAVAILABLE, &headers, cap, now()),
            Some(cap)
        );
        assert_eq!(
            retry_after_hint(StatusCode::TOO_MANY_REQUESTS, &headers, Duration::MAX, now()),
            Some(Duration::from_secs(90))
        );
        assert_eq!(
            retry_after_hint(StatusCode::BAD_GATEWAY, &headers, cap, now()),
            None
        );
    }
}
