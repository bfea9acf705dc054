//! Reading the sensor's CSV logs: timestamp layouts, per-line decoding and
//! the lazy scanner that ties them together.

pub mod decode;
pub mod scan;
pub mod timestamp;

pub use decode::{DepthReading, FlowAngleReading, Malformed, WidthReading, CHANNELS};
pub use scan::{
    scan_depth, scan_width, LogScanner, RawLine, ScanCursor, ScanStats, DEPTH_PREAMBLE_LINES,
    WIDTH_HEADER_LINES,
};
pub use timestamp::{normalize, parse_range_bound, Timestamp};
