use chrono::{NaiveDateTime, Timelike};

/// `M/D/YY H:mm`, written by older firmware.
pub const LEGACY_FORMAT: &str = "%m/%d/%y %H:%M";
/// `YYYY-MM-DD HH:mm:ss`, written by current firmware.
pub const ISO_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
/// `YYYY-MM-DD HH:mm`, accepted for range query bounds.
pub const RANGE_BOUND_FORMAT: &str = "%Y-%m-%d %H:%M";

const CANONICAL_FORMAT: &str = "%-m/%-d/%y %-H:%M";

/// Allowed digit-group widths of a format, and the separators between groups.
struct Shape {
    groups: &'static [(usize, usize)],
    seps: &'static [char],
}

const LEGACY_SHAPE: Shape = Shape {
    groups: &[(1, 2), (1, 2), (2, 2), (1, 2), (2, 2)],
    seps: &['/', '/', ' ', ':'],
};

const ISO_SHAPE: Shape = Shape {
    groups: &[(4, 4), (2, 2), (2, 2), (2, 2), (2, 2), (2, 2)],
    seps: &['-', '-', ' ', ':', ':'],
};

const RANGE_BOUND_SHAPE: Shape = Shape {
    groups: &[(4, 4), (2, 2), (2, 2), (2, 2), (2, 2)],
    seps: &['-', '-', ' ', ':'],
};

impl Shape {
    /// chrono accepts 1-digit values for padded fields; this rejects them.
    fn fits(&self, raw: &str) -> bool {
        let mut rest = raw;
        for (i, &(min, max)) in self.groups.iter().enumerate() {
            let digits = rest.bytes().take_while(u8::is_ascii_digit).count();
            if digits < min || digits > max {
                return false;
            }
            rest = &rest[digits..];
            if let Some(&sep) = self.seps.get(i) {
                match rest.strip_prefix(sep) {
                    Some(r) => rest = r,
                    None => return false,
                }
            }
        }
        rest.is_empty()
    }
}

/// The two on-disk timestamp layouts, in the order they are tried.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SourceFormat {
    Legacy,
    Iso,
}

impl SourceFormat {
    pub const PRIORITY: [SourceFormat; 2] = [SourceFormat::Legacy, SourceFormat::Iso];

    pub fn as_str(&self) -> &str {
        match self {
            SourceFormat::Legacy => "M/D/YY H:mm",
            SourceFormat::Iso => "YYYY-MM-DD HH:mm:ss",
        }
    }

    fn parse(self, raw: &str) -> Option<NaiveDateTime> {
        let (shape, fmt) = match self {
            SourceFormat::Legacy => (&LEGACY_SHAPE, LEGACY_FORMAT),
            SourceFormat::Iso => (&ISO_SHAPE, ISO_FORMAT),
        };
        if !shape.fits(raw) {
            return None;
        }
        NaiveDateTime::parse_from_str(raw, fmt).ok()
    }
}

/// A parsed log timestamp. Equal instants may still come from different
/// source layouts; the canonical string is what joins them.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Timestamp {
    at: NaiveDateTime,
    format: SourceFormat,
}

impl Timestamp {
    pub fn at(&self) -> NaiveDateTime {
        self.at
    }

    /// The instant truncated to the minute, i.e. what the canonical key encodes.
    pub fn minute(&self) -> NaiveDateTime {
        self.at.with_second(0).unwrap_or(self.at)
    }

    pub fn source_format(&self) -> SourceFormat {
        self.format
    }

    /// `M/D/YY H:mm`, the index key regardless of source layout.
    pub fn canonical(&self) -> String {
        self.at.format(CANONICAL_FORMAT).to_string()
    }
}

/// Try each known layout strictly, in priority order.
/// `None` means the caller should skip the line.
pub fn normalize(raw: &str) -> Option<Timestamp> {
    let raw = raw.trim();
    SourceFormat::PRIORITY
        .iter()
        .find_map(|&format| format.parse(raw).map(|at| Timestamp { at, format }))
}

/// Strict `YYYY-MM-DD HH:mm` parse for range query bounds.
pub fn parse_range_bound(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    if !RANGE_BOUND_SHAPE.fits(raw) {
        return None;
    }
    NaiveDateTime::parse_from_str(raw, RANGE_BOUND_FORMAT).ok()
}
