//! Log sinks: a no-op default and a checksummed append-only file.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crc32fast::Hasher as Crc32Fast;
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::common::{PageCategory, PageId, Result, TransactionId};

/// Receiver for the records the buffer pool emits.
///
/// `log_write` and `force` are called at commit, for each page the
/// transaction dirtied, before that page is written to disk.
pub trait LogSink: Send + Sync {
    fn log_begin(&self, _tid: TransactionId) -> Result<()> {
        Ok(())
    }

    /// Record a page's contents before and after `tid` changed it.
    fn log_write(
        &self,
        tid: TransactionId,
        page: PageId,
        before: &[u8],
        after: &[u8],
    ) -> Result<()>;

    fn log_commit(&self, _tid: TransactionId) -> Result<()> {
        Ok(())
    }

    fn log_abort(&self, _tid: TransactionId) -> Result<()> {
        Ok(())
    }

    /// Make every record so far durable.
    fn force(&self) -> Result<()>;
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopLog;

impl LogSink for NoopLog {
    fn log_write(&self, _: TransactionId, _: PageId, _: &[u8], _: &[u8]) -> Result<()> {
        Ok(())
    }

    fn force(&self) -> Result<()> {
        Ok(())
    }
}

/// A decoded log record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogRecord {
    Begin(TransactionId),
    Write {
        tid: TransactionId,
        page: PageId,
        before: Vec<u8>,
        after: Vec<u8>,
    },
    Commit(TransactionId),
    Abort(TransactionId),
}

const KIND_BEGIN: u8 = 1;
const KIND_WRITE: u8 = 2;
const KIND_COMMIT: u8 = 3;
const KIND_ABORT: u8 = 4;

impl LogRecord {
    fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        let (kind, tid) = match self {
            LogRecord::Begin(tid) => (KIND_BEGIN, tid),
            LogRecord::Write { tid, .. } => (KIND_WRITE, tid),
            LogRecord::Commit(tid) => (KIND_COMMIT, tid),
            LogRecord::Abort(tid) => (KIND_ABORT, tid),
        };
        out.push(kind);
        out.extend_from_slice(&tid.as_u64().to_le_bytes());
        if let LogRecord::Write {
            page, before, after, ..
        } = self
        {
            out.extend_from_slice(&page.table_id().to_le_bytes());
            out.extend_from_slice(&page.page_no().to_le_bytes());
            out.push(page.category() as u8);
            for image in [before, after] {
                out.extend_from_slice(&(image.len() as u32).to_le_bytes());
                out.extend_from_slice(image);
            }
        }
        out
    }

    fn decode(buf: &[u8]) -> Option<Self> {
        let mut cursor = Cursor { buf, pos: 0 };
        let kind = cursor.take(1)?[0];
        let tid = TransactionId::from_raw(u64::from_le_bytes(cursor.take(8)?.try_into().ok()?));
        let record = match kind {
            KIND_BEGIN => LogRecord::Begin(tid),
            KIND_COMMIT => LogRecord::Commit(tid),
            KIND_ABORT => LogRecord::Abort(tid),
            KIND_WRITE => {
                let table = cursor.u32()?;
                let page_no = cursor.u32()?;
                let category = PageCategory::from_u8(cursor.take(1)?[0])?;
                let before_len = cursor.u32()? as usize;
                let before = cursor.take(before_len)?.to_vec();
                let after_len = cursor.u32()? as usize;
                let after = cursor.take(after_len)?.to_vec();
                LogRecord::Write {
                    tid,
                    page: PageId::new(table, page_no, category),
                    before,
                    after,
                }
            }
            _ => return None,
        };
        Some(record)
    }
}

struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn take(&mut self, n: usize) -> Option<&'a [u8]> {
        let slice = self.buf.get(self.pos..self.pos.checked_add(n)?)?;
        self.pos += n;
        Some(slice)
    }

    fn u32(&mut self) -> Option<u32> {
        Some(u32::from_le_bytes(self.take(4)?.try_into().ok()?))
    }
}

/// Append-only log file.
///
/// # Record framing
/// ```text
/// Offset  Size  Field
/// ------  ----  -----
/// 0       4     payload length (little-endian)
/// 4       4     CRC32 of the payload
/// 8       len   payload
/// ```
/// Reading stops at the first record that is short or fails its checksum;
/// anything after it is a torn tail from a crash mid-append.
pub struct FileLog {
    path: PathBuf,
    writer: Mutex<BufWriter<File>>,
}

impl FileLog {
    /// Open `path` for appending, creating it if needed.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path.as_ref())?;
        Ok(Self {
            path: path.as_ref().to_path_buf(),
            writer: Mutex::new(BufWriter::new(file)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Decode every intact record in the file at `path`.
    pub fn read_records<P: AsRef<Path>>(path: P) -> Result<Vec<LogRecord>> {
        let mut data = Vec::new();
        File::open(path)?.read_to_end(&mut data)?;

        let mut records = Vec::new();
        let mut offset = 0usize;
        while offset + 8 <= data.len() {
            let len = u32::from_le_bytes([
                data[offset],
                data[offset + 1],
                data[offset + 2],
                data[offset + 3],
            ]) as usize;
            let crc = u32::from_le_bytes([
                data[offset + 4],
                data[offset + 5],
                data[offset + 6],
                data[offset + 7],
            ]);
            let Some(payload) = data.get(offset + 8..offset + 8 + len) else {
                debug!(offset, "log ends in a partial record");
                break;
            };
            if compute_crc32(payload) != crc {
                warn!(offset, "log record checksum mismatch, ignoring the rest");
                break;
            }
            match LogRecord::decode(payload) {
                Some(record) => records.push(record),
                None => {
                    warn!(offset, "undecodable log record, ignoring the rest");
                    break;
                }
            }
            offset += 8 + len;
        }
        Ok(records)
    }

    fn append(&self, record: &LogRecord) -> Result<()> {
        let payload = record.encode();
        let mut writer = self.writer.lock();
        writer.write_all(&(payload.len() as u32).to_le_bytes())?;
        writer.write_all(&compute_crc32(&payload).to_le_bytes())?;
        writer.write_all(&payload)?;
        Ok(())
    }
}

impl LogSink for FileLog {
    fn log_begin(&self, tid: TransactionId) -> Result<()> {
        self.append(&LogRecord::Begin(tid))
    }

    fn log_write(
        &self,
        tid: TransactionId,
        page: PageId,
        before: &[u8],
        after: &[u8],
    ) -> Result<()> {
        self.append(&LogRecord::Write {
            tid,
            page,
            before: before.to_vec(),
            after: after.to_vec(),
        })
    }

    fn log_commit(&self, tid: TransactionId) -> Result<()> {
        self.append(&LogRecord::Commit(tid))?;
        self.force()
    }

    fn log_abort(&self, tid: TransactionId) -> Result<()> {
        self.append(&LogRecord::Abort(tid))?;
        self.force()
    }

    fn force(&self) -> Result<()> {
        let mut writer = self.writer.lock();
        writer.flush()?;
        writer.get_ref().sync_data()?;
        Ok(())
    }
}

fn compute_crc32(payload: &[u8]) -> u32 {
    let mut hasher = Crc32Fast::new();
    hasher.update(payload);
    hasher.finalize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn leaf(no: u32) -> PageId {
        PageId::new(2, no, PageCategory::Leaf)
    }

    #[test]
    fn test_records_read_back() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("wal.log");
        let tid = TransactionId::from_raw(77);

        let log = FileLog::open(&path).unwrap();
        log.log_begin(tid).unwrap();
        log.log_write(tid, leaf(3), &[1, 2, 3], &[4, 5, 6]).unwrap();
        log.force().unwrap();
        log.log_commit(tid).unwrap();

        let records = FileLog::read_records(&path).unwrap();
        assert_eq!(
            records,
            vec![
                LogRecord::Begin(tid),
                LogRecord::Write {
                    tid,
                    page: leaf(3),
                    before: vec![1, 2, 3],
                    after: vec![4, 5, 6],
                },
                LogRecord::Commit(tid),
            ]
        );
    }

    #[test]
    fn test_torn_tail_is_ignored() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("wal.log");
        let tid = TransactionId::from_raw(5);

        let log = FileLog::open(&path).unwrap();
        log.log_begin(tid).unwrap();
        log.log_abort(tid).unwrap();
        drop(log);

        // half a record header
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(&[9, 0]).unwrap();

        let records = FileLog::read_records(&path).unwrap();
        assert_eq!(records, vec![LogRecord::Begin(tid), LogRecord::Abort(tid)]);
    }

    #[test]
    fn test_corrupt_record_stops_reading() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("wal.log");
        let tid = TransactionId::from_raw(6);

        let log = FileLog::open(&path).unwrap();
        log.log_begin(tid).unwrap();
        log.log_commit(tid).unwrap();
        drop(log);

        let mut data = std::fs::read(&path).unwrap();
        let last = data.len() - 1;
        data[last] ^= 0xFF;
        std::fs::write(&path, &data).unwrap();

        assert_eq!(FileLog::read_records(&path).unwrap(), vec![LogRecord::Begin(tid)]);
    }

    #[test]
    fn test_noop_log_accepts_everything() {
        let tid = TransactionId::from_raw(1);
        let log = NoopLog;
        log.log_begin(tid).unwrap();
        log.log_write(tid, leaf(1), &[], &[]).unwrap();
        log.force().unwrap();
    }
}
