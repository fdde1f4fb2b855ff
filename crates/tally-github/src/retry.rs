//! When, and for how long, to wait before retrying a failed request.

use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::{StatusCode, header::HeaderMap};

/// No single wait exceeds this, whatever the server asks for.
pub const MAX_WAIT: Duration = Duration::from_secs(60);

const BASE_BACKOFF: Duration = Duration::from_secs(1);

/// The wait before retry number `attempt + 1`, or `None` if the response is
/// not worth retrying.
///
/// A 403 is only retryable when it is a rate limit: either the server sent
/// `retry-after`, or `x-ratelimit-remaining` is zero. Any 5xx is retryable
/// with exponential backoff.
pub fn retry_wait(
  status: StatusCode,
  headers: &HeaderMap,
  attempt: u32,
  now: DateTime<Utc>,
) -> Option<Duration> {
  let throttled = status == StatusCode::FORBIDDEN || status == StatusCode::TOO_MANY_REQUESTS;

  let wait = if throttled {
    if let Some(secs) = header_u64(headers, "retry-after") {
      Duration::from_secs(secs)
    } else if header_u64(headers, "x-ratelimit-remaining") == Some(0) {
      let reset = header_u64(headers, "x-ratelimit-reset")
        .and_then(|r| i64::try_from(r).ok())
        .unwrap_or(0);
      let secs = reset.saturating_sub(now.timestamp()).max(0) + 1;
      Duration::from_secs(secs.unsigned_abs())
    } else if status == StatusCode::TOO_MANY_REQUESTS {
      backoff(attempt)
    } else {
      return None;
    }
  } else if status.is_server_error() {
    backoff(attempt)
  } else {
    return None;
  };

  Some(wait.min(MAX_WAIT))
}

/// Exponential backoff for failures that carry no server hint.
pub fn backoff(attempt: u32) -> Duration {
  BASE_BACKOFF
    .saturating_mul(2u32.saturating_pow(attempt))
    .min(MAX_WAIT)
}

fn header_u64(headers: &HeaderMap, name: &str) -> Option<u64> {
  headers.get(name)?.to_str().ok()?.trim().parse().ok()
}

#[cfg(test)]
mod tests {
  use chrono::TimeZone as _;
  use reqwest::header::HeaderValue;

  use super::*;

  fn now() -> DateTime<Utc> { Utc.timestamp_opt(1_700_000_000, 0).unwrap() }

  fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
    let mut map = HeaderMap::new();
    for (k, v) in pairs {
      map.insert(*k, HeaderValue::from_static(v));
    }
    map
  }

  #[test]
  fn honours_retry_after() {
    let h = headers(&[("retry-after", "7")]);
    assert_eq!(
      retry_wait(StatusCode::TOO_MANY_REQUESTS, &h, 0, now()),
      Some(Duration::from_secs(7))
    );
    assert_eq!(
      retry_wait(StatusCode::FORBIDDEN, &h, 0, now()),
      Some(Duration::from_secs(7))
    );
  }

  #[test]
  fn waits_for_rate_limit_reset() {
    let h = headers(&[
      ("x-ratelimit-remaining", "0"),
      ("x-ratelimit-reset", "1700000010"),
    ]);
    assert_eq!(
      retry_wait(StatusCode::FORBIDDEN, &h, 0, now()),
      Some(Duration::from_secs(11))
    );
  }

  #[test]
  fn caps_long_waits() {
    let h = headers(&[
      ("x-ratelimit-remaining", "0"),
      ("x-ratelimit-reset", "1700003600"),
    ]);
    assert_eq!(retry_wait(StatusCode::FORBIDDEN, &h, 0, now()), Some(MAX_WAIT));
  }

  #[test]
  fn plain_forbidden_is_not_retried() {
    let h = headers(&[("x-ratelimit-remaining", "4999")]);
    assert_eq!(retry_wait(StatusCode::FORBIDDEN, &h, 0, now()), None);
    assert_eq!(retry_wait(StatusCode::NOT_FOUND, &HeaderMap::new(), 0, now()), None);
  }

  #[test]
  fn server_errors_back_off_exponentially() {
    let h = HeaderMap::new();
    assert_eq!(
      retry_wait(StatusCode::BAD_GATEWAY, &h, 0, now()),
      Some(Duration::from_secs(1))
    );
    assert_eq!(
      retry_wait(StatusCode::BAD_GATEWAY, &h, 3, now()),
      Some(Duration::from_secs(8))
    );
    assert_eq!(backoff(30), MAX_WAIT);
  }
}
