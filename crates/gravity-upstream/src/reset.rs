//! Rate-limit reset extraction. The upstream announces cooldowns through an
//! inconsistent mix of headers, structured error bodies, and free text, so
//! this walks a precedence list and takes the first hit. A parse failure is
//! never fatal; the caller falls back to the default cooldown.

use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use reqwest::header::HeaderMap;

/// `retry-after-ms: 1500`, `retryDelay: "7739.23s"`, `"retryDelay": "5s"`.
static RETRY_DELAY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)(?:retry-after-ms|retrydelay)["'\s:=]*([0-9]+(?:\.[0-9]+)?)\s*(ms|s)?"#)
        .unwrap()
});

/// `retry after 30 sec`, `Retry after 7s`.
static RETRY_AFTER_TEXT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)retry after\s+([0-9]+(?:\.[0-9]+)?)\s*(?:sec|s)\b").unwrap());

/// `1h23m45s`, `23m45s`, `45s` duration strings.
static DURATION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:([0-9]+)h)?(?:([0-9]+)m)?([0-9]+(?:\.[0-9]+)?)s\b").unwrap()
});

/// `reset ... 2026-08-01T12:00:00Z` timestamps.
static RESET_TIMESTAMP_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)reset[^0-9]*([0-9]{4}-[0-9]{2}-[0-9]{2}T[0-9]{2}:[0-9]{2}:[0-9]{2}(?:\.[0-9]+)?(?:Z|[+-][0-9]{2}:?[0-9]{2})?)",
    )
    .unwrap()
});

fn positive(ms: f64) -> Option<u64> {
    if ms.is_finite() && ms >= 1.0 {
        Some(ms as u64)
    } else {
        None
    }
}

/// Reset delay from response headers, in order of precedence.
pub fn parse_reset_headers(headers: &HeaderMap) -> Option<u64> {
    if let Some(value) = headers.get("retry-after").and_then(|v| v.to_str().ok()) {
        // Plain seconds, or an HTTP date.
        if let Ok(secs) = value.trim().parse::<f64>() {
            if let Some(ms) = positive(secs * 1000.0) {
                return Some(ms);
            }
        } else if let Ok(when) = DateTime::parse_from_rfc2822(value.trim()) {
            let delta = when.with_timezone(&Utc) - Utc::now();
            if let Some(ms) = positive(delta.num_milliseconds() as f64) {
                return Some(ms);
            }
        }
    }

    if let Some(value) = headers
        .get("x-ratelimit-reset")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<i64>().ok())
    {
        let delta_ms = value * 1000 - Utc::now().timestamp_millis();
        if let Some(ms) = positive(delta_ms as f64) {
            return Some(ms);
        }
    }

    if let Some(secs) = headers
        .get("x-ratelimit-reset-after")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<f64>().ok())
    {
        if let Some(ms) = positive(secs * 1000.0) {
            return Some(ms);
        }
    }

    None
}

/// Reset delay buried in an error body or message text.
pub fn parse_reset_text(text: &str) -> Option<u64> {
    if let Some(captures) = RETRY_DELAY_RE.captures(text) {
        let value: f64 = captures[1].parse().ok()?;
        let ms = match captures.get(2).map(|m| m.as_str()) {
            Some("s") => value * 1000.0,
            // bare numbers and explicit "ms" are both millis
            _ => value,
        };
        if let Some(ms) = positive(ms) {
            return Some(ms);
        }
    }

    if let Some(captures) = RETRY_AFTER_TEXT_RE.captures(text) {
        let secs: f64 = captures[1].parse().ok()?;
        if let Some(ms) = positive(secs * 1000.0) {
            return Some(ms);
        }
    }

    if let Some(captures) = DURATION_RE.captures(text) {
        let hours: f64 = captures
            .get(1)
            .and_then(|m| m.as_str().parse().ok())
            .unwrap_or(0.0);
        let minutes: f64 = captures
            .get(2)
            .and_then(|m| m.as_str().parse().ok())
            .unwrap_or(0.0);
        let seconds: f64 = captures[3].parse().ok()?;
        let ms = (hours * 3600.0 + minutes * 60.0 + seconds) * 1000.0;
        if let Some(ms) = positive(ms) {
            return Some(ms);
        }
    }

    if let Some(captures) = RESET_TIMESTAMP_RE.captures(text) {
        if let Ok(when) = DateTime::parse_from_rfc3339(&captures[1]) {
            let delta = when.with_timezone(&Utc) - Utc::now();
            if let Some(ms) = positive(delta.num_milliseconds() as f64) {
                return Some(ms);
            }
        }
    }

    None
}

/// Headers first, then the body text.
pub fn parse_reset(headers: &HeaderMap, body: &str) -> Option<u64> {
    parse_reset_headers(headers).or_else(|| parse_reset_text(body))
}
