//! JSON-lines event store shared between processes.
//!
//! One stored event per line, appended under an exclusive file lock. Each
//! process keeps an in-memory index and catches up with lines written by other
//! processes before every operation.

use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use fs2::FileExt;
use tracing::{debug, warn};

use conduit_core::{ExpectedVersion, StreamName};
use conduit_events::{EventStore, EventStoreError, StoredEvent, UncommittedEvent};

use super::log::EventLog;

#[derive(Debug, Default)]
struct Index {
    log: EventLog,
    /// Bytes of the file already indexed.
    offset: u64,
    /// Lines of the file already indexed.
    lines: usize,
}

impl Index {
    /// Index every complete line past `self.offset`.
    fn catch_up(&mut self, file: &File) -> Result<(), EventStoreError> {
        if file.metadata()?.len() <= self.offset {
            return Ok(());
        }

        let mut handle = file;
        handle.seek(SeekFrom::Start(self.offset))?;
        let mut reader = BufReader::new(handle);
        let mut line = String::new();

        loop {
            line.clear();
            let read = reader.read_line(&mut line)?;
            // A line without its newline is still being written.
            if read == 0 || !line.ends_with('\n') {
                break;
            }

            let event: StoredEvent =
                serde_json::from_str(line.trim_end()).map_err(|e| EventStoreError::Corrupted {
                    line: self.lines + 1,
                    reason: e.to_string(),
                })?;

            self.log.push(event);
            self.lines += 1;
            self.offset += read as u64;
        }

        Ok(())
    }
}

/// Append-only event store backed by a JSON-lines file.
///
/// The index mutex is held for every file operation, so the shared `File`
/// handle is never seeked or written concurrently within one process.
#[derive(Debug)]
pub struct FileEventStore {
    path: PathBuf,
    file: File,
    index: Mutex<Index>,
}

/// Releases the file lock on drop.
struct FileLock<'a>(&'a File);

impl<'a> FileLock<'a> {
    fn exclusive(file: &'a File) -> std::io::Result<Self> {
        FileExt::lock_exclusive(file)?;
        Ok(Self(file))
    }

    fn shared(file: &'a File) -> std::io::Result<Self> {
        FileExt::lock_shared(file)?;
        Ok(Self(file))
    }
}

impl Drop for FileLock<'_> {
    fn drop(&mut self) {
        let _ = FileExt::unlock(self.0);
    }
}

/// Write `lines` at the end of the log. On failure the file is cut back to
/// `offset` so the next append does not continue a half-written line.
fn write_lines(
    file: &File,
    offset: u64,
    lines: &[u8],
    write: impl FnOnce(&File, &[u8]) -> io::Result<()>,
) -> io::Result<()> {
    let Err(err) = write(file, lines) else {
        return Ok(());
    };
    if let Err(truncate) = file.set_len(offset) {
        warn!(offset, error = %truncate, "failed append could not be rolled back");
    }
    Err(err)
}

fn write_and_sync(mut file: &File, lines: &[u8]) -> io::Result<()> {
    file.write_all(lines)?;
    file.sync_data()
}

impl FileEventStore {
    /// Open (or create) the log at `path` and index its current contents.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, EventStoreError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(&path)?;

        let store = Self {
            path,
            file,
            index: Mutex::new(Index::default()),
        };

        let events = store.read(EventLog::len)?;
        debug!(path = %store.path.display(), events, "opened event log");

        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> Result<MutexGuard<'_, Index>, EventStoreError> {
        self.index.lock().map_err(|_| EventStoreError::Poisoned)
    }

    /// Run `read` against an index that includes every complete line on disk.
    fn read<T>(&self, read: impl FnOnce(&EventLog) -> T) -> Result<T, EventStoreError> {
        let mut index = self.lock()?;
        {
            let _guard = FileLock::shared(&self.file)?;
            index.catch_up(&self.file)?;
        }
        Ok(read(&index.log))
    }
}

impl EventStore for FileEventStore {
    fn append(
        &self,
        stream: &StreamName,
        events: Vec<UncommittedEvent>,
        expected_version: ExpectedVersion,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        if events.is_empty() {
            return Ok(vec![]);
        }

        let mut index = self.lock()?;
        let _guard = FileLock::exclusive(&self.file)?;
        index.catch_up(&self.file)?;

        let committed = index.log.prepare(stream, events, expected_version)?;

        let mut buf = String::new();
        for e in &committed {
            let line = serde_json::to_string(e).map_err(|err| {
                EventStoreError::InvalidAppend(format!("event serialization failed: {err}"))
            })?;
            buf.push_str(&line);
            buf.push('\n');
        }

        write_lines(&self.file, index.offset, buf.as_bytes(), write_and_sync)?;

        index.offset += buf.len() as u64;
        index.lines += committed.len();
        for e in &committed {
            index.log.push(e.clone());
        }

        Ok(committed)
    }

    fn load_stream(&self, stream: &StreamName) -> Result<Vec<StoredEvent>, EventStoreError> {
        self.read(|log| log.load_stream(stream))
    }

    fn read_all(
        &self,
        after_position: u64,
        limit: usize,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        self.read(|log| log.read_all(after_position, limit))
    }

    fn streams(&self, category: &str) -> Result<Vec<StreamName>, EventStoreError> {
        self.read(|log| log.streams(category))
    }
}
