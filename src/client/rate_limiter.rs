//! Upstream Rate Limit Tracking
//!
//! Remembers provider-announced cooldowns so calls during a cooldown fail
//! fast and the gateway moves to the next candidate.

use parking_lot::RwLock;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Body fragments that mark a non-429 response as a rate limit
const RATE_LIMIT_MARKERS: &[&str] = &[
    "rate limit",
    "rate_limit",
    "ratelimit",
    "too many requests",
    "overloaded_error",
];

/// Longest cooldown honoured from a `retry-after` header
pub const MAX_COOLDOWN: Duration = Duration::from_secs(3600);

/// Per-provider cooldown deadlines
#[derive(Debug, Default)]
pub struct RateLimitTracker {
    cooldowns: RwLock<HashMap<String, Instant>>,
}

impl RateLimitTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a cooldown from a rate-limited response's `retry-after` header.
    ///
    /// Without the header nothing is recorded and `None` is returned. The
    /// cooldown is capped at [`MAX_COOLDOWN`].
    pub fn record_rate_limit(&self, provider: &str, headers: &HeaderMap) -> Option<Duration> {
        let cooldown = headers
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_retry_after)?
            .min(MAX_COOLDOWN);

        let deadline = Instant::now().checked_add(cooldown)?;
        let mut cooldowns = self.cooldowns.write();
        // Keep the later deadline when two responses race.
        let entry = cooldowns.entry(provider.to_string()).or_insert(deadline);
        *entry = (*entry).max(deadline);
        Some(cooldown)
    }

    /// Time left before `provider` may be called again
    pub fn remaining_cooldown(&self, provider: &str) -> Option<Duration> {
        let deadline = *self.cooldowns.read().get(provider)?;
        let left = deadline.saturating_duration_since(Instant::now());
        (!left.is_zero()).then_some(left)
    }

    pub fn clear(&self, provider: &str) {
        self.cooldowns.write().remove(provider);
    }

    /// 429, or another status whose body reads like a rate limit
    pub fn is_rate_limit_error(status: u16, body: &str) -> bool {
        if status == 429 {
            return true;
        }
        let body = body.to_ascii_lowercase();
        RATE_LIMIT_MARKERS.iter().any(|marker| body.contains(marker))
    }
}

/// `retry-after` as integer seconds or a compound duration such as `1m30s`
fn parse_retry_after(value: &str) -> Option<Duration> {
    let value = value.trim();
    match value.parse::<u64>() {
        Ok(secs) => Some(Duration::from_secs(secs)),
        Err(_) => parse_compound_duration(value),
    }
}

/// Sum of `<number><unit>` parts, units `h`, `m`, `s` and `ms`
fn parse_compound_duration(value: &str) -> Option<Duration> {
    if value.is_empty() {
        return None;
    }

    let mut rest = value;
    let mut total = Duration::ZERO;

    while !rest.is_empty() {
        let split = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .filter(|&i| i > 0)?;
        let amount: f64 = rest[..split].parse().ok()?;
        rest = &rest[split..];

        let (unit_secs, unit_len) = if rest.starts_with("ms") {
            (0.001, 2)
        } else {
            match rest.as_bytes()[0] {
                b'h' => (3600.0, 1),
                b'm' => (60.0, 1),
                b's' => (1.0, 1),
                _ => return None,
            }
        };
        total = total.checked_add(Duration::try_from_secs_f64(amount * unit_secs).ok()?)?;
        rest = &rest[unit_len..];
    }

    Some(total)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compound_durations() {
        let cases = [
            ("45s", Duration::from_secs(45)),
            ("2m", Duration::from_secs(120)),
            ("1h15m", Duration::from_secs(4500)),
            ("250ms", Duration::from_millis(250)),
            ("2.5s", Duration::from_millis(2500)),
            ("1m500ms", Duration::from_millis(60_500)),
        ];
        for (input, expected) in cases {
            assert_eq!(parse_compound_duration(input), Some(expected), "{input}");
        }

        for bad in ["", "later", "10", "5x", "m"] {
            assert_eq!(parse_compound_duration(bad), None, "{bad}");
        }
    }

    #[test]
    fn test_retry_after_accepts_plain_seconds() {
        assert_eq!(parse_retry_after("12"), Some(Duration::from_secs(12)));
        assert_eq!(parse_retry_after(" 3m "), Some(Duration::from_secs(180)));
        assert_eq!(parse_retry_after("Wed, 21 Oct 2015 07:28:00 GMT"), None);
    }

    #[test]
    fn test_rate_limit_detection() {
        assert!(RateLimitTracker::is_rate_limit_error(429, ""));
        assert!(RateLimitTracker::is_rate_limit_error(400, r#"{"code":"RATE_LIMIT"}"#));
        assert!(RateLimitTracker::is_rate_limit_error(529, "overloaded_error"));
        assert!(!RateLimitTracker::is_rate_limit_error(400, "unknown model"));
        assert!(!RateLimitTracker::is_rate_limit_error(502, "bad gateway"));
    }

    #[test]
    fn test_cooldown_is_per_provider() {
        let tracker = RateLimitTracker::new();
        let mut headers = HeaderMap::new();
        headers.insert(RETRY_AFTER, "20".parse().unwrap());

        assert_eq!(
            tracker.record_rate_limit("anthropic", &headers),
            Some(Duration::from_secs(20))
        );
        assert!(tracker.remaining_cooldown("anthropic").is_some());
        assert!(tracker.remaining_cooldown("openai").is_none());

        tracker.clear("anthropic");
        assert!(tracker.remaining_cooldown("anthropic").is_none());
    }

    #[test]
    fn test_shorter_cooldown_does_not_shrink_deadline() {
        let tracker = RateLimitTracker::new();
        let mut long = HeaderMap::new();
        long.insert(RETRY_AFTER, "60".parse().unwrap());
        let mut short = HeaderMap::new();
        short.insert(RETRY_AFTER, "1".parse().unwrap());

        tracker.record_rate_limit("openai", &long);
        tracker.record_rate_limit("openai", &short);
        assert!(tracker.remaining_cooldown("openai").unwrap() > Duration::from_secs(30));
    }

    #[test]
    fn test_huge_retry_after_is_capped() {
        let tracker = RateLimitTracker::new();
        let mut headers = HeaderMap::new();
        headers.insert(RETRY_AFTER, "18446744073709551615".parse().unwrap());

        assert_eq!(tracker.record_rate_limit("openai", &headers), Some(MAX_COOLDOWN));
        let left = tracker.remaining_cooldown("openai").unwrap();
        assert!(left <= MAX_COOLDOWN);
        assert!(left > MAX_COOLDOWN - Duration::from_secs(60));
    }

    #[test]
    fn test_compound_duration_overflow_is_rejected() {
        // Each part fits in a Duration, their sum does not.
        let half = u64::MAX / 2 + 1;
        let value = format!("{half}s{half}s");
        assert_eq!(parse_compound_duration(&value), None);
        assert_eq!(parse_retry_after(&value), None);
        assert_eq!(parse_compound_duration("99999999999999999999999h"), None);
    }

    #[test]
    fn test_missing_header_starts_no_cooldown() {
        let tracker = RateLimitTracker::new();
        assert_eq!(tracker.record_rate_limit("openai", &HeaderMap::new()), None);
        assert!(tracker.remaining_cooldown("openai").is_none());
    }
}
