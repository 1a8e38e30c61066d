//! Request deadline stage.
//!
//! # Responsibilities
//! - Bound every non-long-running request by the server maximum
//! - Honour a shorter `?timeout=` from the client (Go duration syntax)
//! - Give long-running requests a jittered lifetime budget instead of a deadline
//!
//! # Design Decisions
//! - The deadline counts from the received timestamp, not from this stage
//! - A zero, negative or too-large client timeout falls back to the maximum

use std::time::{Duration, Instant};

use axum::{
    body::Body,
    extract::State,
    http::Request,
    middleware::Next,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::error::ApiError;
use crate::request::context::{received_timestamp_from, request_info_from, RequestContext};
use crate::request::long_running::{is_long_running, jittered_timeout, LongRunningTimeoutKey};

pub const NO_REQUEST_INFO_MESSAGE: &str =
    "no RequestInfo found in the context, handler chain must be wrong";

#[derive(Debug, Clone, Copy)]
pub struct DeadlineState {
    pub request_timeout_max: Duration,
    pub min_request_timeout: Duration,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DurationError {
    #[error("time: invalid duration {0:?}")]
    Invalid(String),

    #[error("time: missing unit in duration {0:?}")]
    MissingUnit(String),

    #[error("time: unknown unit {unit:?} in duration {input:?}")]
    UnknownUnit { unit: String, input: String },
}

fn unit_nanos(unit: &str) -> Option<u128> {
    Some(match unit {
        "ns" => 1,
        "us" | "µs" | "μs" => 1_000,
        "ms" => 1_000_000,
        "s" => 1_000_000_000,
        "m" => 60 * 1_000_000_000,
        "h" => 3_600 * 1_000_000_000,
        _ => return None,
    })
}

/// Parses a duration such as `"300ms"`, `"1.5h"` or `"2h45m"`.
///
/// Negative durations parse successfully and yield `Duration::ZERO`.
pub fn parse_go_duration(input: &str) -> Result<Duration, DurationError> {
    let invalid = || DurationError::Invalid(input.to_string());

    let (negative, mut rest) = match input.as_bytes().first() {
        Some(b'-') => (true, &input[1..]),
        Some(b'+') => (false, &input[1..]),
        _ => (false, input),
    };
    if rest == "0" {
        return Ok(Duration::ZERO);
    }
    if rest.is_empty() {
        return Err(invalid());
    }

    let mut total: u128 = 0;
    while !rest.is_empty() {
        let int_len = rest.bytes().take_while(u8::is_ascii_digit).count();
        let (int_part, after) = rest.split_at(int_len);
        let (frac_part, after) = match after.strip_prefix('.') {
            Some(tail) => {
                let frac_len = tail.bytes().take_while(u8::is_ascii_digit).count();
                tail.split_at(frac_len)
            }
            None => ("", after),
        };
        if int_part.is_empty() && frac_part.is_empty() {
            return Err(invalid());
        }

        let unit_len = after
            .char_indices()
            .find(|(_, c)| *c == '.' || c.is_ascii_digit())
            .map(|(i, _)| i)
            .unwrap_or(after.len());
        let (unit, tail) = after.split_at(unit_len);
        if unit.is_empty() {
            return Err(DurationError::MissingUnit(input.to_string()));
        }
        let scale = unit_nanos(unit).ok_or_else(|| DurationError::UnknownUnit {
            unit: unit.to_string(),
            input: input.to_string(),
        })?;

        let whole: u128 = if int_part.is_empty() {
            0
        } else {
            int_part.parse().map_err(|_| invalid())?
        };
        let mut value = whole.checked_mul(scale).ok_or_else(invalid)?;
        // Digits beyond nanosecond precision cannot change the result.
        let frac_digits = &frac_part[..frac_part.len().min(18)];
        if !frac_digits.is_empty() {
            let frac: u128 = frac_digits.parse().map_err(|_| invalid())?;
            let denom = 10u128.pow(frac_digits.len() as u32);
            value += frac * scale / denom;
        }
        total = total.checked_add(value).ok_or_else(invalid)?;
        if total > i64::MAX as u128 {
            return Err(invalid());
        }
        rest = tail;
    }

    if negative {
        return Ok(Duration::ZERO);
    }
    Ok(Duration::from_nanos(total as u64))
}

/// First `timeout` query value, if present and non-empty.
fn timeout_param(query: Option<&str>) -> Option<String> {
    url::form_urlencoded::parse(query?.as_bytes())
        .find(|(k, _)| k == "timeout")
        .map(|(_, v)| v.into_owned())
        .filter(|v| !v.is_empty())
}

/// The effective timeout: the client's value when it is positive and below the maximum.
pub fn effective_timeout(user: Option<Duration>, max: Duration) -> Duration {
    match user {
        Some(user) if !user.is_zero() && user < max => user,
        _ => max,
    }
}

pub async fn with_request_deadline(
    State(state): State<DeadlineState>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    let ctx = RequestContext::of(&req);
    if request_info_from(&ctx).is_none() {
        return ApiError::internal(NO_REQUEST_INFO_MESSAGE).into_response();
    }

    if is_long_running(&ctx) {
        ctx.with::<LongRunningTimeoutKey>(jittered_timeout(state.min_request_timeout))
            .attach(&mut req);
        return next.run(req).await;
    }

    let user_timeout = match timeout_param(req.uri().query()) {
        Some(raw) => match parse_go_duration(&raw) {
            Ok(timeout) => Some(timeout),
            Err(e) => {
                return ApiError::bad_request(format!(
                    "invalid timeout specified in the request URL: {}",
                    e
                ))
                .into_response();
            }
        },
        None => None,
    };
    let timeout = effective_timeout(user_timeout, state.request_timeout_max);

    let started = received_timestamp_from(&ctx)
        .map(|ts| ts.instant)
        .unwrap_or_else(Instant::now);
    let deadline = tokio::time::Instant::from_std(started + timeout);

    ctx.with_deadline(deadline).attach(&mut req);
    next.run(req).await
}
