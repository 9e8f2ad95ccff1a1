use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::model::Event;

/// Frame one event as `[len][bincode][crc32]`.
fn write_record(writer: &mut impl Write, event: &Event) -> io::Result<()> {
    let payload =
        bincode::serialize(event).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let len = u32::try_from(payload.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "WAL record too large"))?;
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.write_all(&crc32fast::hash(&payload).to_le_bytes())?;
    Ok(())
}

/// Read exactly `buf.len()` bytes; `Ok(false)` on a clean or torn end of file.
fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<bool> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

/// Next intact record, or `None` at the first truncated/corrupt one.
fn read_record(reader: &mut impl Read) -> io::Result<Option<Event>> {
    let mut len_buf = [0u8; 4];
    if !read_full(reader, &mut len_buf)? {
        return Ok(None);
    }
    let mut payload = vec![0u8; u32::from_le_bytes(len_buf) as usize];
    if !read_full(reader, &mut payload)? {
        return Ok(None);
    }
    let mut crc_buf = [0u8; 4];
    if !read_full(reader, &mut crc_buf)? {
        return Ok(None);
    }
    if u32::from_le_bytes(crc_buf) != crc32fast::hash(&payload) {
        return Ok(None);
    }
    Ok(bincode::deserialize::<Event>(&payload).ok())
}

/// Append-only write-ahead log of store events.
///
/// A torn trailing record (crash mid-write) fails its length or CRC check and
/// is dropped on replay, so a multi-row change framed as one record is
/// all-or-nothing on disk.
pub struct Wal {
    writer: BufWriter<File>,
    path: PathBuf,
    appends_since_compact: u64,
    /// File length after the last successful `flush_sync`.
    committed_len: u64,
    /// Records buffered since then.
    pending: u64,
}

impl Wal {
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let committed_len = file.metadata()?.len();
        Ok(Self {
            writer: BufWriter::new(file),
            path: path.to_path_buf(),
            appends_since_compact: 0,
            committed_len,
            pending: 0,
        })
    }

    #[cfg(test)]
    pub fn append(&mut self, event: &Event) -> io::Result<()> {
        self.append_buffered(event)?;
        self.flush_sync()
    }

    /// Buffer a record; durable only after `flush_sync`.
    pub fn append_buffered(&mut self, event: &Event) -> io::Result<()> {
        write_record(&mut self.writer, event)?;
        self.appends_since_compact += 1;
        self.pending += 1;
        Ok(())
    }

    pub fn flush_sync(&mut self) -> io::Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        self.committed_len = self.writer.get_ref().metadata()?.len();
        self.pending = 0;
        Ok(())
    }

    /// Throw away everything since the last successful `flush_sync`: buffered
    /// bytes are dropped and bytes that already reached the file are cut off,
    /// so a batch its callers saw fail can never resurface on replay.
    pub fn rollback(&mut self) -> io::Result<()> {
        let file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        let stale = std::mem::replace(&mut self.writer, BufWriter::new(file));
        let (stale_file, _unwritten) = stale.into_parts();
        drop(stale_file);

        let file = self.writer.get_ref();
        file.set_len(self.committed_len)?;
        file.sync_all()?;
        self.appends_since_compact = self.appends_since_compact.saturating_sub(self.pending);
        self.pending = 0;
        Ok(())
    }

    pub fn appends_since_compact(&self) -> u64 {
        self.appends_since_compact
    }

    /// Rewrite the log as `events` via a temp file renamed over the original.
    pub fn compact(&mut self, events: &[Event]) -> io::Result<()> {
        let tmp_path = self.path.with_extension("wal.tmp");
        {
            let mut tmp = BufWriter::new(File::create(&tmp_path)?);
            for event in events {
                write_record(&mut tmp, event)?;
            }
            tmp.flush()?;
            tmp.get_ref().sync_all()?;
        }
        self.writer.flush()?;
        fs::rename(&tmp_path, &self.path)?;
        let file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        self.committed_len = file.metadata()?.len();
        self.writer = BufWriter::new(file);
        self.appends_since_compact = 0;
        self.pending = 0;
        Ok(())
    }

    /// All intact events in the log. A missing file is an empty log.
    pub fn replay(path: &Path) -> io::Result<Vec<Event>> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        let mut reader = BufReader::new(file);
        let mut events = Vec::new();
        while let Some(event) = read_record(&mut reader)? {
            events.push(event);
        }
        Ok(events)
    }
}
