use std::{
    fs::File,
    io::{self, BufRead, BufReader, Seek, SeekFrom},
    path::{Path, PathBuf},
};
use tracing::{debug, warn};

use crate::error::{QueryError, Result};
use crate::log::decode::{
    decode_depth_line, decode_flow_angle_line, decode_width_line, header_record, DepthReading,
    FlowAngleReading, Malformed, WidthReading,
};
use csv::StringRecord;

/// Header and calibration lines at the top of every depth log.
///
/// Two readers of the same file historically disagreed (63 vs 64); 64 is
/// the documented layout and is applied everywhere.
pub const DEPTH_PREAMBLE_LINES: usize = 64;

/// The width log has a single header row.
pub const WIDTH_HEADER_LINES: usize = 1;

/// One line of a log, without its line terminator.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawLine {
    /// 1-based line number within the file.
    pub number: usize,
    pub text: String,
    /// False only for a final line with no newline yet, which the writer
    /// may still be appending to.
    pub terminated: bool,
}

/// Position after the last newline-terminated line a scanner consumed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ScanCursor {
    pub offset: u64,
    pub lines: usize,
}

/// Lazy, line-at-a-time reader over a log. Each scanner owns its reader,
/// so concurrent scans of one file never share a cursor.
pub struct LogScanner<R> {
    reader: R,
    skip: usize,
    cursor: ScanCursor,
    buf: Vec<u8>,
    done: bool,
}

impl LogScanner<BufReader<File>> {
    /// Open `path` read-only and skip its first `preamble` lines.
    pub fn open(path: &Path, preamble: usize) -> Result<Self> {
        Self::resume(path, ScanCursor::default(), preamble)
    }

    /// Continue a previous scan of `path` from `cursor`.
    pub fn resume(path: &Path, cursor: ScanCursor, preamble: usize) -> Result<Self> {
        let mut file = File::open(path).map_err(|e| QueryError::io(path, e))?;
        if cursor.offset > 0 {
            file.seek(SeekFrom::Start(cursor.offset))
                .map_err(|e| QueryError::io(path, e))?;
        }
        Ok(Self::with_cursor(BufReader::new(file), cursor, preamble))
    }
}

impl<R: BufRead> LogScanner<R> {
    pub fn new(reader: R, preamble: usize) -> Self {
        Self::with_cursor(reader, ScanCursor::default(), preamble)
    }

    fn with_cursor(reader: R, cursor: ScanCursor, preamble: usize) -> Self {
        Self {
            reader,
            skip: preamble.saturating_sub(cursor.lines),
            cursor,
            buf: Vec::with_capacity(256),
            done: false,
        }
    }

    pub fn cursor(&self) -> ScanCursor {
        self.cursor
    }
}

fn trim_eol(buf: &[u8]) -> &[u8] {
    let buf = buf.strip_suffix(b"\n").unwrap_or(buf);
    buf.strip_suffix(b"\r").unwrap_or(buf)
}

impl<R: BufRead> Iterator for LogScanner<R> {
    type Item = io::Result<RawLine>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.done {
            self.buf.clear();
            let n = match self.reader.read_until(b'\n', &mut self.buf) {
                Ok(0) => {
                    self.done = true;
                    return None;
                }
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            };

            let number = self.cursor.lines + 1;
            let terminated = self.buf.last() == Some(&b'\n');
            if terminated {
                self.cursor.offset += n as u64;
                self.cursor.lines += 1;
            } else {
                self.done = true;
            }

            if self.skip > 0 {
                self.skip -= 1;
                continue;
            }

            return Some(Ok(RawLine {
                number,
                text: String::from_utf8_lossy(trim_eol(&self.buf)).into_owned(),
                terminated,
            }));
        }
        None
    }
}

/// Counters for one decoding pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ScanStats {
    pub lines: usize,
    pub decoded: usize,
    pub skipped: usize,
    /// The file ended in a line with no newline, left for the next pass.
    pub partial_tail: bool,
}

type Decoder<T> = Box<dyn FnMut(&str) -> std::result::Result<T, Malformed> + Send>;

/// Decodes the lines of a scanner, dropping (and counting) the ones that
/// do not decode. Only I/O failures end the sequence early.
///
/// A final line without newline is never decoded: the writer may be
/// halfway through it, and a cut-off number can still parse.
pub struct DecodedLines<R, T> {
    lines: LogScanner<R>,
    path: PathBuf,
    kind: &'static str,
    decode: Decoder<T>,
    stats: ScanStats,
}

pub type DepthScan<R> = DecodedLines<R, DepthReading>;
pub type WidthScan<R> = DecodedLines<R, WidthReading>;
pub type FlowAngleScan<R> = DecodedLines<R, FlowAngleReading>;

impl<R: BufRead, T> DecodedLines<R, T> {
    pub fn new<D>(
        lines: LogScanner<R>,
        path: impl Into<PathBuf>,
        kind: &'static str,
        decode: D,
    ) -> Self
    where
        D: FnMut(&str) -> std::result::Result<T, Malformed> + Send + 'static,
    {
        Self {
            lines,
            path: path.into(),
            kind,
            decode: Box::new(decode),
            stats: ScanStats::default(),
        }
    }

    pub fn stats(&self) -> ScanStats {
        self.stats
    }

    pub fn cursor(&self) -> ScanCursor {
        self.lines.cursor()
    }
}

impl<R: BufRead, T> Iterator for DecodedLines<R, T> {
    type Item = Result<T>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let line = match self.lines.next()? {
                Ok(line) => line,
                Err(e) => return Some(Err(QueryError::io(&self.path, e))),
            };
            self.stats.lines += 1;
            if !line.terminated {
                self.stats.partial_tail = true;
                debug!(
                    path = %self.path.display(),
                    line = line.number,
                    "leaving unterminated trailing {} line for the next pass",
                    self.kind
                );
                continue;
            }
            if line.text.trim().is_empty() {
                continue;
            }

            match (self.decode)(&line.text) {
                Ok(value) => {
                    self.stats.decoded += 1;
                    return Some(Ok(value));
                }
                Err(reason) => {
                    self.stats.skipped += 1;
                    warn!(
                        path = %self.path.display(),
                        line = line.number,
                        content = %line.text,
                        %reason,
                        "skipping malformed {} line",
                        self.kind
                    );
                }
            }
        }
    }
}

/// Decoded readings of a depth log, past its preamble.
#[tracing::instrument(level = "debug", skip(path), fields(path = %path.display()))]
pub fn scan_depth(path: &Path) -> Result<DepthScan<BufReader<File>>> {
    let lines = LogScanner::open(path, DEPTH_PREAMBLE_LINES)?;
    Ok(DecodedLines::new(lines, path, "depth", decode_depth_line))
}

/// Resume decoding a depth log from where an earlier pass stopped.
pub fn resume_depth(path: &Path, cursor: ScanCursor) -> Result<DepthScan<BufReader<File>>> {
    let lines = LogScanner::resume(path, cursor, DEPTH_PREAMBLE_LINES)?;
    Ok(DecodedLines::new(lines, path, "depth", decode_depth_line))
}

/// Decoded readings of a width log, past its header row.
#[tracing::instrument(level = "debug", skip(path), fields(path = %path.display()))]
pub fn scan_width(path: &Path) -> Result<WidthScan<BufReader<File>>> {
    let lines = LogScanner::open(path, WIDTH_HEADER_LINES)?;
    Ok(DecodedLines::new(lines, path, "width", decode_width_line))
}

/// Decoded rows of the flow-angle log, addressed by its own header row.
#[tracing::instrument(level = "debug", skip(path), fields(path = %path.display()))]
pub fn scan_flow_angle(path: &Path) -> Result<FlowAngleScan<BufReader<File>>> {
    let mut lines = LogScanner::open(path, 0)?;
    let headers = match lines.next() {
        Some(Ok(line)) if line.terminated => header_record(&line.text),
        Some(Err(e)) => return Err(QueryError::io(path, e)),
        _ => StringRecord::new(),
    };
    Ok(DecodedLines::new(lines, path, "flow angle", move |raw: &str| {
        decode_flow_angle_line(&headers, raw)
    }))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::log::decode::CHANNELS;
    use std::io::{Cursor, Write};
    use tempfile::NamedTempFile;
    use tracing_subscriber::{EnvFilter, FmtSubscriber};

    pub(crate) fn init_test_logging() {
        let subscriber = FmtSubscriber::builder()
            .with_env_filter(
                EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| EnvFilter::new("info,sensorlog=debug")),
            )
            .with_test_writer()
            .finish();
        let _ = tracing::subscriber::set_global_default(subscriber);
    }

    /// A depth data line whose last column is `mean`.
    pub(crate) fn depth_line(stamp: &str, mean: f64) -> String {
        let mut fields = vec![stamp.to_string()];
        fields.extend((1..CHANNELS).map(|i| format!("0.{i}")));
        fields.push(mean.to_string());
        fields.join(",")
    }

    /// A depth log with the calibration preamble followed by `lines`.
    pub(crate) fn depth_log(lines: &[String]) -> String {
        let mut out = String::new();
        for i in 0..DEPTH_PREAMBLE_LINES {
            out.push_str(&format!("# calibration {i}\n"));
        }
        for line in lines {
            out.push_str(line);
            out.push('\n');
        }
        out
    }

    pub(crate) fn write_log(content: &str) -> NamedTempFile {
        let mut tmp = NamedTempFile::new().unwrap();
        tmp.write_all(content.as_bytes()).unwrap();
        tmp.flush().unwrap();
        tmp
    }

    #[test]
    fn skips_preamble_and_numbers_lines() {
        let input = "h1\nh2\na\r\nb\n";
        let lines: Vec<RawLine> = LogScanner::new(Cursor::new(input), 2)
            .collect::<io::Result<_>>()
            .unwrap();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].number, 3);
        assert_eq!(lines[0].text, "a");
        assert_eq!(lines[1].text, "b");
        assert!(lines.iter().all(|l| l.terminated));
    }

    #[test]
    fn trailing_line_without_newline_is_flagged_and_not_committed() {
        let input = "a\nb\npart";
        let mut scanner = LogScanner::new(Cursor::new(input), 0);
        let lines: Vec<RawLine> = scanner.by_ref().map(io::Result::unwrap).collect();
        assert_eq!(lines.len(), 3);
        assert!(!lines[2].terminated);
        assert_eq!(
            scanner.cursor(),
            ScanCursor {
                offset: 4,
                lines: 2
            }
        );
    }

    #[test]
    fn malformed_lines_are_skipped_and_counted() {
        init_test_logging();
        let input = depth_log(&[
            depth_line("2025-06-12 10:15:59", 3.0),
            "2025-06-12 10:16:59,1,2,3,4,5,6,7,8,9".to_string(),
            String::new(),
            depth_line("not a date", 1.0),
            depth_line("2025-06-12 10:17:59", 3.5),
        ]);
        let mut scan = DecodedLines::new(
            LogScanner::new(Cursor::new(input), DEPTH_PREAMBLE_LINES),
            "mem",
            "depth",
            decode_depth_line,
        );
        let readings: Vec<DepthReading> = scan.by_ref().map(Result::unwrap).collect();
        assert_eq!(readings.len(), 2);
        assert_eq!(readings[1].mean_depth, 3.5);
        assert_eq!(
            scan.stats(),
            ScanStats {
                lines: 5,
                decoded: 2,
                skipped: 2,
                partial_tail: false
            }
        );
    }

    #[test]
    fn unterminated_tail_is_left_for_later() {
        let mut input = depth_log(&[depth_line("2025-06-12 10:15:59", 3.0)]);
        // decodes fine, but the writer may not be done with the last column
        input.push_str(&depth_line("2025-06-12 10:16:59", 3.2));
        let mut scan = DecodedLines::new(
            LogScanner::new(Cursor::new(input), DEPTH_PREAMBLE_LINES),
            "mem",
            "depth",
            decode_depth_line,
        );
        assert_eq!(scan.by_ref().count(), 1);
        assert!(scan.stats().partial_tail);
        assert_eq!(scan.stats().skipped, 0);
    }

    #[test]
    fn resumed_scan_picks_up_appended_lines() {
        let tmp = write_log(&depth_log(&[depth_line("2025-06-12 10:15:59", 3.0)]));
        let mut first = scan_depth(tmp.path()).unwrap();
        assert_eq!(first.by_ref().count(), 1);
        let cursor = first.cursor();
        assert_eq!(cursor.lines, DEPTH_PREAMBLE_LINES + 1);

        let mut file = tmp.reopen().unwrap();
        file.seek(SeekFrom::End(0)).unwrap();
        writeln!(file, "{}", depth_line("2025-06-12 10:16:59", 3.2)).unwrap();

        let more: Vec<DepthReading> = resume_depth(tmp.path(), cursor)
            .unwrap()
            .map(Result::unwrap)
            .collect();
        assert_eq!(more.len(), 1);
        assert_eq!(more[0].time, "10:16:59");
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let err = scan_depth(Path::new("/nonexistent/depth.csv"))
            .err()
            .expect("open must fail");
        assert!(matches!(err, QueryError::Io { .. }));
    }
}
