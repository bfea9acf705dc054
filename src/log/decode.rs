use csv::StringRecord;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::log::timestamp::{normalize, Timestamp};

/// Depth channels per reading.
pub const CHANNELS: usize = 16;

/// Timestamp field plus one field per channel.
pub const DEPTH_FIELDS: usize = 1 + CHANNELS;

/// One decoded line of the depth log.
#[derive(Clone, Debug, PartialEq)]
pub struct DepthReading {
    /// Date token exactly as written, e.g. `2025-06-12` or `6/12/25`.
    pub date: String,
    /// Time token exactly as written, e.g. `10:16:59`.
    pub time: String,
    pub timestamp: Timestamp,
    /// Non-numeric channels are `NaN`: present but invalid.
    pub channels: [f64; CHANNELS],
    /// The line's last column. The device writes its own mean there; it is
    /// not recomputed from `channels`.
    pub mean_depth: f64,
}

impl DepthReading {
    /// `"<date> <time>"` as reassembled from the raw tokens.
    pub fn raw_timestamp(&self) -> String {
        format!("{} {}", self.date, self.time)
    }

    pub fn matches(&self, date: &str, time: &str) -> bool {
        self.date == date.trim() && self.time == time.trim()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct WidthReading {
    pub timestamp: String,
    pub width: f64,
}

/// A row of the flow-angle log, addressed by header name.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FlowAngleReading {
    pub timestamp: String,
    #[serde(rename = "flowangle")]
    pub flow_angle: f64,
}

/// Why a line could not be decoded.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Malformed {
    TooFewFields { found: usize, needed: usize },
    TimestampParts,
    UnparsedTimestamp(String),
    EmptyTimestamp,
    BadValue(String),
    Record(String),
}

impl fmt::Display for Malformed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Malformed::TooFewFields { found, needed } => {
                write!(f, "{found} fields, expected at least {needed}")
            }
            Malformed::TimestampParts => write!(f, "timestamp is not `<date> <time>`"),
            Malformed::UnparsedTimestamp(raw) => write!(f, "unrecognised timestamp {raw:?}"),
            Malformed::EmptyTimestamp => write!(f, "empty timestamp"),
            Malformed::BadValue(raw) => write!(f, "value {raw:?} is not a finite number"),
            Malformed::Record(err) => write!(f, "{err}"),
        }
    }
}

/// Trim whitespace + strip outer quotes if present.
pub fn clean_field(raw: &str) -> &str {
    let trimmed = raw.trim();
    if trimmed.len() >= 2 && trimmed.starts_with('"') && trimmed.ends_with('"') {
        trimmed[1..trimmed.len() - 1].trim()
    } else {
        trimmed
    }
}

fn parse_channel(raw: &str) -> f64 {
    clean_field(raw).parse::<f64>().unwrap_or(f64::NAN)
}

/// Decode `"<date> <time>",v1,...,v16`.
pub fn decode_depth_line(raw: &str) -> Result<DepthReading, Malformed> {
    let fields: Vec<&str> = raw.split(',').collect();
    if fields.len() < DEPTH_FIELDS {
        return Err(Malformed::TooFewFields {
            found: fields.len(),
            needed: DEPTH_FIELDS,
        });
    }

    let stamp = clean_field(fields[0]);
    let mut parts = stamp.split_whitespace();
    let (date, time) = match (parts.next(), parts.next()) {
        (Some(d), Some(t)) => (d, t),
        _ => return Err(Malformed::TimestampParts),
    };
    let timestamp = normalize(&format!("{date} {time}"))
        .ok_or_else(|| Malformed::UnparsedTimestamp(stamp.to_string()))?;

    let mut channels = [f64::NAN; CHANNELS];
    for (slot, field) in channels.iter_mut().zip(&fields[1..DEPTH_FIELDS]) {
        *slot = parse_channel(field);
    }
    let mean_depth = fields.last().map_or(f64::NAN, |f| parse_channel(f));

    Ok(DepthReading {
        date: date.to_string(),
        time: time.to_string(),
        timestamp,
        channels,
        mean_depth,
    })
}

/// Decode `timestamp,width`.
pub fn decode_width_line(raw: &str) -> Result<WidthReading, Malformed> {
    let mut fields = raw.splitn(2, ',');
    let timestamp = clean_field(fields.next().unwrap_or_default());
    if timestamp.is_empty() {
        return Err(Malformed::EmptyTimestamp);
    }
    let raw_width = fields.next().map(clean_field).ok_or(Malformed::TooFewFields {
        found: 1,
        needed: 2,
    })?;
    match raw_width.parse::<f64>() {
        Ok(width) if width.is_finite() => Ok(WidthReading {
            timestamp: timestamp.to_string(),
            width,
        }),
        _ => Err(Malformed::BadValue(raw_width.to_string())),
    }
}

/// Header row of a header-addressed log. Names are matched case-insensitively.
pub fn header_record(raw: &str) -> StringRecord {
    raw.split(',')
        .map(|h| clean_field(h).to_ascii_lowercase())
        .collect()
}

/// Decode one row of the flow-angle log against its header row.
pub fn decode_flow_angle_line(
    headers: &StringRecord,
    raw: &str,
) -> Result<FlowAngleReading, Malformed> {
    let record: StringRecord = raw.split(',').map(clean_field).collect();
    let reading: FlowAngleReading = record
        .deserialize(Some(headers))
        .map_err(|e| Malformed::Record(e.to_string()))?;
    if reading.timestamp.is_empty() {
        return Err(Malformed::EmptyTimestamp);
    }
    if !reading.flow_angle.is_finite() {
        return Err(Malformed::BadValue(reading.flow_angle.to_string()));
    }
    Ok(reading)
}
