//! Row validation.
//!
//! Validation is a pure function from one decoded CSV record to either a [Sample] or a
//! [Rejection] naming the rule that failed. It never mutates shared state, and parse failures are
//! classified rather than propagated.

use crate::models::Sample;

use csv::StringRecord;
use strum_macros::Display;

/// Required column headers in the uploaded dataset.
pub const TIMESTAMP_COLUMN: &str = "timestamp_ms";
pub const DEVICE_ID_COLUMN: &str = "device_id";
pub const CHANNEL_COLUMN: &str = "channel";
pub const VALUE_COLUMN: &str = "value";

/// Maximum tolerated clock skew into the future, in milliseconds (24 hours).
pub const MAX_FUTURE_SKEW_MS: i64 = 86_400_000;

/// Minimum number of fields a data row must carry.
const MIN_FIELDS: usize = 4;

/// Reasons a row may be rejected.
#[derive(Clone, Copy, Debug, Display, Eq, PartialEq)]
#[strum(serialize_all = "snake_case")]
pub enum Rejection {
    /// The header row lacks one of the required columns
    MissingColumn,
    /// The row has fewer fields than required columns
    MissingField,
    /// The timestamp is not parseable as an integer
    BadTimestamp,
    /// The timestamp is negative
    NegativeTimestamp,
    /// The timestamp is more than 24 hours in the future
    FutureTimestamp,
    /// The device ID is empty after trimming
    EmptyDeviceId,
    /// The channel is empty after trimming
    EmptyChannel,
    /// The value is not parseable as a floating-point number
    BadValue,
    /// The value parsed to NaN or an infinity
    NonFiniteValue,
}

/// Positions of the required columns, resolved by header name rather than position.
///
/// A missing required header leaves its position unresolved, which rejects every data row; the
/// job itself still runs to completion.
#[derive(Clone, Copy, Debug)]
pub struct Columns {
    timestamp_ms: Option<usize>,
    device_id: Option<usize>,
    channel: Option<usize>,
    value: Option<usize>,
}

impl Columns {
    /// Resolve column positions from the header record.
    pub fn from_headers(headers: &StringRecord) -> Self {
        let position = |name: &str| headers.iter().position(|header| header.trim() == name);
        Self {
            timestamp_ms: position(TIMESTAMP_COLUMN),
            device_id: position(DEVICE_ID_COLUMN),
            channel: position(CHANNEL_COLUMN),
            value: position(VALUE_COLUMN),
        }
    }
}

/// Validate one data row against the resolved columns.
///
/// # Arguments
///
/// * `columns`: Column positions resolved from the header row
/// * `record`: The decoded data row
/// * `now_ms`: Wall-clock time at validation, as milliseconds since the Unix epoch
pub fn validate(
    columns: &Columns,
    record: &StringRecord,
    now_ms: i64,
) -> Result<Sample, Rejection> {
    if record.len() < MIN_FIELDS {
        return Err(Rejection::MissingField);
    }

    let timestamp_ms = field(record, columns.timestamp_ms)?
        .trim()
        .parse::<i64>()
        .map_err(|_| Rejection::BadTimestamp)?;
    if timestamp_ms < 0 {
        return Err(Rejection::NegativeTimestamp);
    }
    if timestamp_ms > now_ms + MAX_FUTURE_SKEW_MS {
        return Err(Rejection::FutureTimestamp);
    }

    let device_id = field(record, columns.device_id)?.trim();
    if device_id.is_empty() {
        return Err(Rejection::EmptyDeviceId);
    }

    let channel = field(record, columns.channel)?.trim();
    if channel.is_empty() {
        return Err(Rejection::EmptyChannel);
    }

    let value = field(record, columns.value)?
        .trim()
        .parse::<f64>()
        .map_err(|_| Rejection::BadValue)?;
    if !value.is_finite() {
        return Err(Rejection::NonFiniteValue);
    }

    Ok(Sample {
        timestamp_ms,
        device_id: device_id.to_string(),
        channel: channel.to_string(),
        value,
    })
}

/// Fetch one required field from a record by resolved column position.
fn field(record: &StringRecord, position: Option<usize>) -> Result<&str, Rejection> {
    let position = position.ok_or(Rejection::MissingColumn)?;
    record.get(position).ok_or(Rejection::MissingField)
}
