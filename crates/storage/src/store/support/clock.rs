#![forbid(unsafe_code)]

use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

pub(in crate::store) fn now_ms() -> i64 {
    let nanos = OffsetDateTime::now_utc().unix_timestamp_nanos();
    let ms = nanos / 1_000_000i128;
    if ms <= 0 {
        0
    } else if ms >= i64::MAX as i128 {
        i64::MAX
    } else {
        ms as i64
    }
}

/// `updated_at_ms` never repeats for a row, even within one millisecond.
pub(in crate::store) fn next_updated_at_ms(previous: i64) -> i64 {
    now_ms().max(previous.saturating_add(1))
}

pub fn ts_ms_to_rfc3339(ts_ms: i64) -> String {
    let nanos = (ts_ms as i128) * 1_000_000i128;
    let dt = OffsetDateTime::from_unix_timestamp_nanos(nanos).unwrap_or(OffsetDateTime::UNIX_EPOCH);
    dt.format(&Rfc3339)
        .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn updated_at_is_strictly_monotonic() {
        let far_future = now_ms() + 60_000;
        assert_eq!(next_updated_at_ms(far_future), far_future + 1);
        assert!(next_updated_at_ms(0) >= now_ms() - 1_000);
    }

    #[test]
    fn renders_rfc3339() {
        assert_eq!(ts_ms_to_rfc3339(0), "1970-01-01T00:00:00Z");
        assert!(ts_ms_to_rfc3339(86_400_000).starts_with("1970-01-02T00:00:00"));
    }
}
