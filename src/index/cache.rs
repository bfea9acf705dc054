use std::{
    fs,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicU8, Ordering},
        Arc, Mutex, PoisonError, RwLock,
    },
    time::{Instant, SystemTime},
};
use tracing::{debug, info};

use crate::error::{QueryError, Result};
use crate::index::TimestampIndex;
use crate::log::{
    scan::{resume_depth, DepthScan},
    scan_depth, DepthReading, ScanCursor, Timestamp,
};

/// Lifecycle of a cached index.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum IndexPhase {
    Unbuilt,
    Building,
    Ready,
}

impl IndexPhase {
    pub fn as_str(&self) -> &str {
        match self {
            IndexPhase::Unbuilt => "unbuilt",
            IndexPhase::Building => "building",
            IndexPhase::Ready => "ready",
        }
    }

    fn from_u8(v: u8) -> Self {
        match v {
            1 => IndexPhase::Building,
            2 => IndexPhase::Ready,
            _ => IndexPhase::Unbuilt,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            IndexPhase::Unbuilt => 0,
            IndexPhase::Building => 1,
            IndexPhase::Ready => 2,
        }
    }
}

/// What the file looked like when a snapshot was taken.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct FileStamp {
    len: u64,
    modified: Option<SystemTime>,
}

impl FileStamp {
    fn read(path: &Path) -> Result<Self> {
        let meta = fs::metadata(path).map_err(|e| QueryError::io(path, e))?;
        Ok(Self {
            len: meta.len(),
            modified: meta.modified().ok(),
        })
    }
}

/// Immutable decoded contents of a depth log at one point in time.
#[derive(Debug)]
pub struct Snapshot {
    readings: Vec<DepthReading>,
    cursor: ScanCursor,
    stamp: FileStamp,
    skipped: usize,
}

impl Snapshot {
    fn build(path: &Path, stamp: FileStamp) -> Result<Self> {
        let scan = scan_depth(path)?;
        Self::drain(scan, Vec::new(), 0, stamp)
    }

    /// Only valid when the file has grown since `self` was taken.
    fn extend(&self, path: &Path, stamp: FileStamp) -> Result<Self> {
        let scan = resume_depth(path, self.cursor)?;
        Self::drain(scan, self.readings.clone(), self.skipped, stamp)
    }

    fn drain<R: std::io::BufRead>(
        mut scan: DepthScan<R>,
        mut readings: Vec<DepthReading>,
        skipped: usize,
        stamp: FileStamp,
    ) -> Result<Self> {
        for reading in scan.by_ref() {
            readings.push(reading?);
        }
        Ok(Self {
            readings,
            cursor: scan.cursor(),
            stamp,
            skipped: skipped + scan.stats().skipped,
        })
    }

    /// Only a strictly longer file can be an append; anything else may have
    /// rewritten bytes already decoded.
    fn can_extend(&self, stamp: &FileStamp) -> bool {
        stamp.len > self.stamp.len && stamp.len >= self.cursor.offset
    }

    /// Every decoded reading, in file order.
    pub fn readings(&self) -> &[DepthReading] {
        &self.readings
    }

    /// Malformed lines skipped while building this snapshot.
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    pub fn index<F>(&self, filter: F) -> TimestampIndex
    where
        F: FnMut(&Timestamp) -> bool,
    {
        TimestampIndex::build(&self.readings, filter)
    }
}

/// Decoded readings of one depth log, refreshed lazily when the file
/// changes. Every caller gets an `Arc<Snapshot>` that stays fixed for the
/// whole query, whatever the sensor appends meanwhile.
pub struct IndexCache {
    path: PathBuf,
    ready: RwLock<Option<Arc<Snapshot>>>,
    refresh: Mutex<()>,
    phase: AtomicU8,
}

impl IndexCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ready: RwLock::new(None),
            refresh: Mutex::new(()),
            phase: AtomicU8::new(IndexPhase::Unbuilt.as_u8()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn phase(&self) -> IndexPhase {
        IndexPhase::from_u8(self.phase.load(Ordering::Acquire))
    }

    fn set_phase(&self, phase: IndexPhase) {
        self.phase.store(phase.as_u8(), Ordering::Release);
    }

    fn current(&self) -> Option<Arc<Snapshot>> {
        self.ready
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// The current snapshot, rebuilding or extending it first if the file
    /// changed since it was taken.
    pub fn snapshot(&self) -> Result<Arc<Snapshot>> {
        let stamp = FileStamp::read(&self.path)?;
        if let Some(current) = self.current() {
            if current.stamp == stamp {
                return Ok(current);
            }
        }

        // one refresher at a time; latecomers reuse its result
        let _guard = self.refresh.lock().unwrap_or_else(PoisonError::into_inner);
        let stamp = FileStamp::read(&self.path)?;
        let current = self.current();
        if let Some(current) = &current {
            if current.stamp == stamp {
                return Ok(Arc::clone(current));
            }
        }

        self.set_phase(IndexPhase::Building);
        let start = Instant::now();
        let extending = current.as_ref().is_some_and(|prev| prev.can_extend(&stamp));
        let built = match &current {
            Some(prev) if extending => prev.extend(&self.path, stamp),
            _ => Snapshot::build(&self.path, stamp),
        };

        let next = match built {
            Ok(next) => Arc::new(next),
            Err(e) => {
                self.set_phase(if current.is_some() {
                    IndexPhase::Ready
                } else {
                    IndexPhase::Unbuilt
                });
                return Err(e);
            }
        };

        *self.ready.write().unwrap_or_else(PoisonError::into_inner) = Some(Arc::clone(&next));
        self.set_phase(IndexPhase::Ready);

        let previous = current.as_ref().map_or(0, |c| c.readings.len());
        if extending {
            debug!(
                path = %self.path.display(),
                added = next.readings.len().saturating_sub(previous),
                readings = next.readings.len(),
                elapsed = ?start.elapsed(),
                "depth index extended"
            );
        } else {
            info!(
                path = %self.path.display(),
                readings = next.readings.len(),
                skipped = next.skipped,
                elapsed = ?start.elapsed(),
                "depth index built"
            );
        }
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::scan::tests::{depth_line, depth_log, init_test_logging, write_log};
    use std::io::{Seek, SeekFrom, Write};
    use std::thread;
    use std::time::Duration;

    #[test]
    fn unbuilt_until_first_query() -> anyhow::Result<()> {
        init_test_logging();
        let tmp = write_log(&depth_log(&[depth_line("2025-06-12 10:16:59", 3.2)]));
        let cache = IndexCache::new(tmp.path());
        assert_eq!(cache.phase(), IndexPhase::Unbuilt);

        let snap = cache.snapshot()?;
        assert_eq!(cache.phase(), IndexPhase::Ready);
        assert_eq!(snap.readings().len(), 1);
        assert_eq!(snap.readings()[0].mean_depth, 3.2);
        Ok(())
    }

    #[test]
    fn unchanged_file_reuses_snapshot() -> anyhow::Result<()> {
        let tmp = write_log(&depth_log(&[depth_line("2025-06-12 10:16:59", 3.2)]));
        let cache = IndexCache::new(tmp.path());
        let a = cache.snapshot()?;
        let b = cache.snapshot()?;
        assert!(Arc::ptr_eq(&a, &b));
        Ok(())
    }

    #[test]
    fn appended_lines_extend_without_disturbing_old_snapshot() -> anyhow::Result<()> {
        let tmp = write_log(&depth_log(&[depth_line("2025-06-12 10:16:59", 3.2)]));
        let cache = IndexCache::new(tmp.path());
        let before = cache.snapshot()?;

        let mut file = tmp.reopen()?;
        file.seek(SeekFrom::End(0))?;
        writeln!(file, "{}", depth_line("2025-06-12 10:17:59", 3.5))?;
        write!(file, "2025-06-12 10:18")?;
        file.flush()?;

        let after = cache.snapshot()?;
        assert_eq!(before.readings().len(), 1);
        assert_eq!(after.readings().len(), 2);
        assert_eq!(after.readings()[1].mean_depth, 3.5);

        // the writer finishes the partial line
        writeln!(file, ":59,{}", vec!["1.0"; 16].join(","))?;
        file.flush()?;
        let last = cache.snapshot()?;
        let times: Vec<&str> = last.readings().iter().map(|r| r.time.as_str()).collect();
        assert_eq!(times, ["10:16:59", "10:17:59", "10:18:59"]);
        Ok(())
    }

    #[test]
    fn unterminated_tail_is_indexed_once_completed() -> anyhow::Result<()> {
        let mut content = depth_log(&[depth_line("2025-06-12 10:16:59", 3.2)]);
        content.push_str(&depth_line("2025-06-12 10:17:59", 3.5));
        let tmp = write_log(&content);
        let cache = IndexCache::new(tmp.path());
        assert_eq!(cache.snapshot()?.readings().len(), 1);

        let mut file = tmp.reopen()?;
        file.seek(SeekFrom::End(0))?;
        writeln!(file)?;
        writeln!(file, "{}", depth_line("2025-06-12 10:18:59", 3.7))?;
        file.flush()?;

        let snap = cache.snapshot()?;
        let means: Vec<f64> = snap.readings().iter().map(|r| r.mean_depth).collect();
        assert_eq!(means, [3.2, 3.5, 3.7]);
        Ok(())
    }

    #[test]
    fn truncated_file_is_rebuilt() -> anyhow::Result<()> {
        let tmp = write_log(&depth_log(&[
            depth_line("2025-06-12 10:16:59", 3.2),
            depth_line("2025-06-12 10:17:59", 3.5),
        ]));
        let cache = IndexCache::new(tmp.path());
        assert_eq!(cache.snapshot()?.readings().len(), 2);

        fs::write(
            tmp.path(),
            depth_log(&[depth_line("2025-07-01 00:00:00", 9.0)]),
        )?;
        let snap = cache.snapshot()?;
        assert_eq!(snap.readings().len(), 1);
        assert_eq!(snap.readings()[0].mean_depth, 9.0);
        Ok(())
    }

    #[test]
    fn same_length_rewrite_is_rebuilt() -> anyhow::Result<()> {
        let tmp = write_log(&depth_log(&[depth_line("2025-06-12 10:16:59", 3.2)]));
        let cache = IndexCache::new(tmp.path());
        let before = cache.snapshot()?;
        assert_eq!(before.readings()[0].mean_depth, 3.2);

        let rewritten = depth_log(&[depth_line("2025-06-12 10:16:59", 7.7)]);
        assert_eq!(rewritten.len() as u64, fs::metadata(tmp.path())?.len());
        fs::write(tmp.path(), rewritten)?;
        // coarse mtime clocks could otherwise hide the rewrite
        let file = fs::File::options().write(true).open(tmp.path())?;
        file.set_modified(SystemTime::now() + Duration::from_secs(10))?;

        let after = cache.snapshot()?;
        assert!(!Arc::ptr_eq(&before, &after));
        assert_eq!(after.readings().len(), 1);
        assert_eq!(after.readings()[0].mean_depth, 7.7);
        Ok(())
    }

    #[test]
    fn missing_file_leaves_cache_unbuilt() {
        let cache = IndexCache::new("/nonexistent/depth.csv");
        assert!(matches!(cache.snapshot(), Err(QueryError::Io { .. })));
        assert_eq!(cache.phase(), IndexPhase::Unbuilt);
    }

    #[test]
    fn concurrent_queries_share_one_snapshot() -> anyhow::Result<()> {
        let lines: Vec<String> = (0..500)
            .map(|i| depth_line(&format!("2025-06-12 {:02}:{:02}:00", i / 60 % 24, i % 60), i as f64))
            .collect();
        let tmp = write_log(&depth_log(&lines));
        let cache = Arc::new(IndexCache::new(tmp.path()));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                thread::spawn(move || cache.snapshot().map(|s| s.readings().len()))
            })
            .collect();
        for h in handles {
            assert_eq!(h.join().expect("query thread panicked")?, 500);
        }
        Ok(())
    }
}
