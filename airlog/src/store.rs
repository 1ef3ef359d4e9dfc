//! The durable record log.
//!
//! A [`LogStore`] is a single CSV file shared by every acquisition thread,
//! the maintenance thread and any number of readers.
//!
//! # File Layout
//!
//! ```text
//! metric,value,timestamp        <- fixed header
//! CO,37,1700000000.25
//! pm2.5,12.3,1700000001.5
//! ...
//! ```
//!
//! Rows are appended in append-call order, not sample order; readers that
//! care about time order must sort.
//!
//! # Locking
//!
//! One mutex per store brackets every disk step: the single `write_all` of
//! an append batch, the full read of a snapshot, and the read-rewrite-rename
//! of a retention pass. Batches are serialized before the lock is taken, so
//! the critical section is pure I/O. Share a store across threads as
//! `Arc<LogStore>`.
//!
//! Inside the mutex each step also takes an advisory lock on a sibling
//! `<name>.lock` file: exclusive for appends and retention, shared for
//! snapshots. This keeps a second process (e.g. `airlog retain` next to a
//! running `airlog run`) from rewriting the log under a writer. The lock
//! file is never renamed, so it stays valid across retention rewrites.
//!
//! # Failed Writes
//!
//! A write that fails part way is truncated back to the last complete row.
//! If that truncation also fails, the next append discards any unterminated
//! tail before writing, so one failed write never wedges the log.
//!
//! # Example Usage
//!
//! ```rust,no_run
//! use airlog::{LogStore, MetricRecord, StoreConfig};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let store = LogStore::open("persist/table.csv", StoreConfig::default())?;
//!
//! store.append(&[
//!     MetricRecord::new("CO", 37.0, 1_700_000_000.0),
//!     MetricRecord::new("pm2.5", 12.3, 1_700_000_000.0),
//! ])?;
//!
//! let records = store.snapshot()?;
//! let report = store.retain_and_consolidate()?;
//! println!("{} records, {} dropped", records.len(), report.dropped);
//! # Ok(())
//! # }
//! ```

use std::ffi::OsString;
use std::fmt::Write as _;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::error::{Result, StoreError};
use crate::record::{MetricRecord, now_secs};
use crate::retention::{RetentionPolicy, RetentionReport, consolidate};

/// Header row of every log file.
pub const HEADER: &str = "metric,value,timestamp";

/// Suffix of the sibling file a retention pass writes before renaming.
const REWRITE_SUFFIX: &str = ".rewrite";

/// Suffix of the sibling file that carries the cross-process lock.
const LOCK_SUFFIX: &str = ".lock";

/// Bytes read per step when searching backwards for the last row end.
const TAIL_CHUNK: usize = 4096;

/// Tuning for a [`LogStore`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Call `sync_data` after every append.
    pub sync_writes: bool,

    /// Extra snapshot reads attempted when the log looks mid-write.
    pub snapshot_retries: u32,

    /// Pause between snapshot attempts.
    #[serde(with = "crate::config::duration_serde")]
    pub retry_backoff: Duration,

    /// Policy applied by [`LogStore::retain_and_consolidate`].
    pub retention: RetentionPolicy,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            sync_writes: false,
            snapshot_retries: 5,
            retry_backoff: Duration::from_millis(50),
            retention: RetentionPolicy::default(),
        }
    }
}

/// An append-only CSV log of [`MetricRecord`]s.
#[derive(Debug)]
pub struct LogStore {
    /// Path to the log file.
    path: PathBuf,
    /// Sibling path used while rewriting.
    rewrite_path: PathBuf,
    /// Sibling path of the cross-process lock file.
    lock_path: PathBuf,
    /// Open handle to the lock file.
    lock_file: File,
    /// Store configuration.
    config: StoreConfig,
    /// Rejects appends and retention when set.
    read_only: bool,
    /// Serializes every disk step within this process.
    lock: Mutex<()>,
}

/// Holds the advisory lock on a store's lock file until dropped.
struct FileLock<'a> {
    file: &'a File,
}

impl Drop for FileLock<'_> {
    fn drop(&mut self) {
        // Closing the handle would release it too; the handle outlives the guard.
        let _ = self.file.unlock();
    }
}

impl LogStore {
    /// Opens the log at `path`, creating it if needed.
    ///
    /// If the file doesn't exist, any missing parent directories are created
    /// and the header is written. An existing zero-length file also gets the
    /// header. An existing file must start with [`HEADER`].
    ///
    /// # Errors
    ///
    /// - [`ConfigError::InvalidPolicy`](crate::error::ConfigError::InvalidPolicy) if the retention policy is invalid
    /// - [`StoreError::DirectoryAccess`] if the parent directory cannot be created
    /// - [`StoreError::SchemaMismatch`] if the existing header differs
    /// - [`StoreError::Io`] on any other I/O failure
    pub fn open<P: AsRef<Path>>(path: P, config: StoreConfig) -> Result<Self> {
        config.retention.validate()?;

        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| StoreError::DirectoryAccess {
                path: parent.display().to_string(),
                source: e,
            })?;
        }

        let store = Self::with_paths(path, config, false)?;
        {
            let _guard = store.lock.lock();
            let _file_lock = store.lock_file_exclusive()?;

            if store.path.exists() {
                store.check_existing()?;
            } else {
                fs::write(&store.path, header_line()).map_err(|e| store.io_error(e))?;
                info!(path = %store.path.display(), "created log");
            }
        }
        Ok(store)
    }

    /// Opens an existing log for reading only.
    ///
    /// Nothing is written to the log: a zero-length file is left as is, and
    /// [`append`](Self::append) and
    /// [`retain_and_consolidate`](Self::retain_and_consolidate) fail with
    /// [`StoreError::ReadOnly`]. Only the sibling lock file may be created.
    ///
    /// # Errors
    ///
    /// - [`StoreError::Io`] if the log does not exist or cannot be read
    /// - [`StoreError::SchemaMismatch`] if the header differs
    pub fn open_read_only<P: AsRef<Path>>(path: P, config: StoreConfig) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        fs::metadata(&path).map_err(|e| StoreError::Io {
            path: path.display().to_string(),
            source: e,
        })?;

        let store = Self::with_paths(path, config, true)?;
        {
            let _guard = store.lock.lock();
            let _file_lock = store.lock_file_shared()?;
            store.check_existing()?;
        }
        Ok(store)
    }

    /// Derives the sibling paths and opens the lock file.
    fn with_paths(path: PathBuf, config: StoreConfig, read_only: bool) -> Result<Self> {
        let rewrite_path = sibling(&path, REWRITE_SUFFIX);
        let lock_path = sibling(&path, LOCK_SUFFIX);
        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)
            .map_err(|e| StoreError::Io {
                path: lock_path.display().to_string(),
                source: e,
            })?;

        Ok(Self {
            path,
            rewrite_path,
            lock_path,
            lock_file,
            config,
            read_only,
            lock: Mutex::new(()),
        })
    }

    /// Checks the header of an existing log, writing it into an empty one
    /// unless the store is read-only.
    fn check_existing(&self) -> Result<()> {
        let file = File::open(&self.path).map_err(|e| self.io_error(e))?;
        let mut first = String::new();
        BufReader::new(file)
            .read_line(&mut first)
            .map_err(|e| self.io_error(e))?;

        if first.is_empty() {
            if !self.read_only {
                fs::write(&self.path, header_line()).map_err(|e| self.io_error(e))?;
                debug!(path = %self.path.display(), "wrote header to empty log");
            }
            return Ok(());
        }

        let found = first.trim_end_matches(['\r', '\n']);
        if found != HEADER {
            return Err(StoreError::SchemaMismatch {
                path: self.path.display().to_string(),
                found: found.to_string(),
            }
            .into());
        }
        Ok(())
    }

    fn lock_file_exclusive(&self) -> Result<FileLock<'_>> {
        self.lock_file.lock().map_err(|e| self.lock_error(e))?;
        Ok(FileLock {
            file: &self.lock_file,
        })
    }

    fn lock_file_shared(&self) -> Result<FileLock<'_>> {
        self.lock_file.lock_shared().map_err(|e| self.lock_error(e))?;
        Ok(FileLock {
            file: &self.lock_file,
        })
    }

    fn ensure_writable(&self) -> Result<()> {
        if self.read_only {
            return Err(StoreError::ReadOnly {
                path: self.path.display().to_string(),
            }
            .into());
        }
        Ok(())
    }

    /// Path to the log file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path to the sibling lock file other processes coordinate on.
    pub fn lock_path(&self) -> &Path {
        &self.lock_path
    }

    /// True if the store was opened with [`open_read_only`](Self::open_read_only).
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// The store's configuration.
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Appends a batch of records as one contiguous write.
    ///
    /// Every record is validated first; if any is invalid nothing is
    /// written. An empty batch is a no-op. If the log has vanished it is
    /// recreated with its header. An unterminated tail left by an earlier
    /// failed write is discarded first, and a write that fails is truncated
    /// back so no partial row remains.
    ///
    /// # Errors
    ///
    /// - [`RecordError`](crate::error::RecordError) if a record cannot be stored
    /// - [`StoreError::ReadOnly`] if the store was opened read-only
    /// - [`StoreError::Io`] if the write fails
    pub fn append(&self, records: &[MetricRecord]) -> Result<()> {
        self.ensure_writable()?;
        if records.is_empty() {
            return Ok(());
        }
        for record in records {
            record.validate()?;
        }

        let mut batch = String::with_capacity(records.len() * 40);
        for record in records {
            push_row(&mut batch, record);
        }

        let _guard = self.lock.lock();
        let _file_lock = self.lock_file_exclusive()?;
        let mut file = OpenOptions::new()
            .read(true)
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| self.io_error(e))?;

        let len = file.metadata().map_err(|e| self.io_error(e))?.len();
        let keep = complete_prefix_len(&mut file, len).map_err(|e| self.io_error(e))?;
        if keep < len {
            warn!(
                path = %self.path.display(),
                discarded = len - keep,
                "discarding unterminated row left by a failed write"
            );
            file.set_len(keep).map_err(|e| self.io_error(e))?;
        }
        if keep == 0 {
            if len == 0 {
                warn!(path = %self.path.display(), "log was missing, recreating header");
            }
            batch.insert_str(0, &header_line());
        }

        let written = file.write_all(batch.as_bytes()).and_then(|()| {
            if self.config.sync_writes {
                file.sync_data()
            } else {
                Ok(())
            }
        });
        if let Err(e) = written {
            if let Err(rollback) = file.set_len(keep) {
                error!(
                    path = %self.path.display(),
                    error = %rollback,
                    "failed to roll back a partial append"
                );
            }
            return Err(self.io_error(e).into());
        }

        debug!(count = records.len(), "appended batch");
        Ok(())
    }

    /// Reads and parses the whole log.
    ///
    /// A missing or empty file, an unterminated last row, or an unparseable
    /// row is treated as transient and the read is retried.
    ///
    /// # Errors
    ///
    /// - [`StoreError::Unreadable`] if every attempt saw a transient state
    /// - [`StoreError::Io`] on any other I/O failure
    pub fn snapshot(&self) -> Result<Vec<MetricRecord>> {
        let attempts = self.config.snapshot_retries.saturating_add(1);
        let mut reason = String::new();

        for attempt in 1..=attempts {
            let read = {
                let _guard = self.lock.lock();
                let _file_lock = self.lock_file_shared()?;
                fs::read_to_string(&self.path)
            };

            match read {
                Ok(content) => match parse_log(&content) {
                    Ok(records) => return Ok(records),
                    Err(why) => reason = why,
                },
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    reason = "log file is missing".to_string();
                }
                Err(e) => return Err(self.io_error(e).into()),
            }

            if attempt < attempts {
                debug!(attempt, reason = %reason, "snapshot saw a transient state, retrying");
                thread::sleep(self.config.retry_backoff);
            }
        }

        Err(StoreError::Unreadable {
            path: self.path.display().to_string(),
            attempts,
            reason,
        }
        .into())
    }

    /// Runs a retention pass using the current time.
    ///
    /// # Errors
    ///
    /// See [`LogStore::retain_and_consolidate_at`].
    pub fn retain_and_consolidate(&self) -> Result<RetentionReport> {
        self.retain_and_consolidate_at(now_secs())
    }

    /// Drops expired records, downsamples old ones, and replaces the log.
    ///
    /// The new content is written to a sibling file and renamed over the
    /// log, all while holding the store lock.
    ///
    /// The whole pass holds the cross-process lock, so a concurrent appender
    /// in another process waits for the rename instead of writing to the
    /// file being replaced.
    ///
    /// # Errors
    ///
    /// - [`StoreError::ReadOnly`] if the store was opened read-only
    /// - [`StoreError::Unreadable`] if the log cannot be parsed
    /// - [`StoreError::Io`] if reading, writing or renaming fails
    pub fn retain_and_consolidate_at(&self, now: f64) -> Result<RetentionReport> {
        self.ensure_writable()?;
        let _guard = self.lock.lock();
        let _file_lock = self.lock_file_exclusive()?;

        let content = fs::read_to_string(&self.path).map_err(|e| self.io_error(e))?;
        let records = parse_log(&content).map_err(|reason| StoreError::Unreadable {
            path: self.path.display().to_string(),
            attempts: 1,
            reason,
        })?;

        let (kept, report) = consolidate(records, now, &self.config.retention);

        let mut out = header_line();
        for record in &kept {
            push_row(&mut out, record);
        }
        self.replace_with(out.as_bytes())?;

        info!(
            dropped = report.dropped,
            consolidated_from = report.consolidated_from,
            consolidated_into = report.consolidated_into,
            kept_recent = report.kept_recent,
            "retention pass complete"
        );
        Ok(report)
    }

    /// Writes `bytes` to the rewrite file and renames it over the log.
    fn replace_with(&self, bytes: &[u8]) -> Result<()> {
        let write = || -> io::Result<()> {
            let mut file = File::create(&self.rewrite_path)?;
            file.write_all(bytes)?;
            file.sync_data()?;
            fs::rename(&self.rewrite_path, &self.path)
        };

        write().map_err(|e| {
            let _ = fs::remove_file(&self.rewrite_path);
            StoreError::Io {
                path: self.rewrite_path.display().to_string(),
                source: e,
            }
            .into()
        })
    }

    fn io_error(&self, source: io::Error) -> StoreError {
        StoreError::Io {
            path: self.path.display().to_string(),
            source,
        }
    }

    fn lock_error(&self, source: io::Error) -> StoreError {
        StoreError::Io {
            path: self.lock_path.display().to_string(),
            source,
        }
    }
}

/// `path` with `suffix` appended to its file name.
fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path
        .file_name()
        .map(OsString::from)
        .unwrap_or_else(|| OsString::from("log"));
    name.push(suffix);
    path.with_file_name(name)
}

/// Length of the file up to and including its last `\n`.
///
/// Anything after that is a row a failed write left unterminated.
fn complete_prefix_len(file: &mut File, len: u64) -> io::Result<u64> {
    if len == 0 {
        return Ok(0);
    }
    let mut last = [0u8; 1];
    file.seek(SeekFrom::Start(len - 1))?;
    file.read_exact(&mut last)?;
    if last[0] == b'\n' {
        return Ok(len);
    }

    let mut buf = vec![0u8; TAIL_CHUNK];
    let mut end = len;

    while end > 0 {
        let start = end.saturating_sub(TAIL_CHUNK as u64);
        #[allow(clippy::cast_possible_truncation)] // at most TAIL_CHUNK
        let chunk = &mut buf[..(end - start) as usize];
        file.seek(SeekFrom::Start(start))?;
        file.read_exact(chunk)?;

        if let Some(pos) = chunk.iter().rposition(|b| *b == b'\n') {
            return Ok(start + pos as u64 + 1);
        }
        end = start;
    }
    Ok(0)
}

fn header_line() -> String {
    format!("{HEADER}\n")
}

/// Appends one `metric,value,timestamp\n` row.
fn push_row(out: &mut String, record: &MetricRecord) {
    // Writing to a String cannot fail.
    let _ = writeln!(out, "{},{},{}", record.metric, record.value, record.timestamp);
}

/// Parses a full log; the error string says why the content is not usable.
fn parse_log(content: &str) -> std::result::Result<Vec<MetricRecord>, String> {
    if content.is_empty() {
        return Err("log is empty".to_string());
    }
    if !content.ends_with('\n') {
        return Err("last row is unterminated".to_string());
    }

    let mut lines = content.lines();
    match lines.next() {
        Some(HEADER) => {}
        Some(other) => return Err(format!("unexpected header '{other}'")),
        None => return Err("log is empty".to_string()),
    }

    lines
        .enumerate()
        .filter(|(_, line)| !line.is_empty())
        .map(|(index, line)| parse_row(line).ok_or_else(|| format!("row {} is malformed", index + 2)))
        .collect()
}

fn parse_row(line: &str) -> Option<MetricRecord> {
    let mut fields = line.split(',');
    let metric = fields.next()?;
    let value = fields.next()?.parse::<f64>().ok()?;
    let timestamp = fields.next()?.parse::<f64>().ok()?;
    if fields.next().is_some() {
        return None;
    }

    let record = MetricRecord::new(metric, value, timestamp);
    record.validate().ok()?;
    Some(record)
}
