use std::time::Duration;

use http::HeaderValue;

use crate::Status;

const SECONDS_IN_HOUR: u64 = 60 * 60;
const SECONDS_IN_MINUTE: u64 = 60;

/// The gRPC spec allows at most 8 digits in a timeout value.
const MAX_TIMEOUT_VALUE: u128 = 99_999_999;

/// Units a `grpc-timeout` value may carry, smallest first.
const UNITS: &[(u128, char)] = &[
    (1, 'n'),
    (1_000, 'u'),
    (1_000_000, 'm'),
    (1_000_000_000, 'S'),
    (60 * 1_000_000_000, 'M'),
    (3_600 * 1_000_000_000, 'H'),
];

/// Encodes a timeout as a `grpc-timeout` header value.
///
/// Picks the smallest unit whose value fits in 8 digits, rounding up so the
/// wire timeout never undercuts the local deadline. Durations beyond what
/// `99999999H` can express clamp to that maximum.
pub fn encode_timeout(timeout: Duration) -> HeaderValue {
    let nanos = timeout.as_nanos();

    for &(unit_nanos, unit) in UNITS {
        let value = nanos.div_ceil(unit_nanos).max(1);
        if value <= MAX_TIMEOUT_VALUE {
            let text = format!("{}{}", value, unit);
            return HeaderValue::from_str(&text).expect("digits and a unit are a valid header");
        }
    }

    HeaderValue::from_static("99999999H")
}

/// Parses a `grpc-timeout` header value.
///
/// Follows the [gRPC over HTTP2 spec]: one to eight ASCII digits followed by
/// a unit in `H M S m u n`. The value must be strictly positive.
///
/// [gRPC over HTTP2 spec]: https://github.com/grpc/grpc/blob/master/doc/PROTOCOL-HTTP2.md
pub fn decode_timeout(value: &str) -> Result<Duration, Status> {
    let malformed = || Status::invalid_argument(format!("invalid grpc-timeout value {:?}", value));

    if value.is_empty() || !value.is_ascii() {
        return Err(malformed());
    }

    let (digits, unit) = value.split_at(value.len() - 1);

    // Capping at 8 digits also keeps the arithmetic below from overflowing.
    if digits.is_empty() || digits.len() > 8 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(malformed());
    }

    let timeout_value: u64 = digits.parse().map_err(|_| malformed())?;
    if timeout_value == 0 {
        return Err(Status::invalid_argument(
            "grpc-timeout must be strictly positive",
        ));
    }

    let duration = match unit {
        "H" => Duration::from_secs(timeout_value * SECONDS_IN_HOUR),
        "M" => Duration::from_secs(timeout_value * SECONDS_IN_MINUTE),
        "S" => Duration::from_secs(timeout_value),
        "m" => Duration::from_millis(timeout_value),
        "u" => Duration::from_micros(timeout_value),
        "n" => Duration::from_nanos(timeout_value),
        _ => return Err(malformed()),
    };

    Ok(duration)
}
