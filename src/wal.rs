use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;

const MAGIC: &[u8; 4] = b"CHTW";
const FORMAT_VERSION: u16 = 1;
const HEADER_LEN: usize = MAGIC.len() + 2;
/// Larger lengths can only come from a corrupt length prefix.
const MAX_RECORD_LEN: u32 = 64 * 1024 * 1024;

fn write_header(writer: &mut impl Write) -> io::Result<()> {
    writer.write_all(MAGIC)?;
    writer.write_all(&FORMAT_VERSION.to_le_bytes())
}

/// Encode a single record as `[len][bincode][crc32]`.
fn encode_record<R: Serialize>(writer: &mut impl Write, record: &R) -> io::Result<()> {
    let payload =
        bincode::serialize(record).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let len = u32::try_from(payload.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "record too large"))?;
    let crc = crc32fast::hash(&payload);
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.write_all(&crc.to_le_bytes())?;
    Ok(())
}

/// Read exactly `buf.len()` bytes; `Ok(false)` on a clean or torn end of file.
fn read_or_eof(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<bool> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

/// Append-only write-ahead log of `R` records.
///
/// File layout: `CHTW` magic, `u16` format version, then per record
/// `[u32: len][bincode: R][u32: crc32]`. A torn trailing record (crash mid
/// write) fails its length or CRC check; replay skips it and `recover` cuts
/// it off.
pub struct Wal<R> {
    writer: BufWriter<File>,
    path: PathBuf,
    appends_since_compact: u64,
    _record: PhantomData<fn(R)>,
}

impl<R: Serialize + DeserializeOwned> Wal<R> {
    /// Open (or create) the log at `path`, writing the header into a new file.
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let mut writer = BufWriter::new(file);
        if writer.get_ref().metadata()?.len() == 0 {
            write_header(&mut writer)?;
            writer.flush()?;
            writer.get_ref().sync_all()?;
        }
        Ok(Self {
            writer,
            path: path.to_path_buf(),
            appends_since_compact: 0,
            _record: PhantomData,
        })
    }

    /// Append and fsync one record. Production code batches through
    /// `append_buffered` + `flush_sync` instead.
    #[cfg(test)]
    pub fn append(&mut self, record: &R) -> io::Result<()> {
        self.append_buffered(record)?;
        self.flush_sync()
    }

    /// Buffer a record without flushing; durable only after `flush_sync`.
    pub fn append_buffered(&mut self, record: &R) -> io::Result<()> {
        encode_record(&mut self.writer, record)?;
        self.appends_since_compact += 1;
        Ok(())
    }

    pub fn flush_sync(&mut self) -> io::Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn appends_since_compact(&self) -> u64 {
        self.appends_since_compact
    }

    fn compact_tmp_path(path: &Path) -> PathBuf {
        path.with_extension("wal.tmp")
    }

    /// Write a snapshot to the side file and fsync it. Slow phase.
    pub fn write_compact_file(path: &Path, records: &[R]) -> io::Result<()> {
        let file = File::create(Self::compact_tmp_path(path))?;
        let mut writer = BufWriter::new(file);
        write_header(&mut writer)?;
        for record in records {
            encode_record(&mut writer, record)?;
        }
        writer.flush()?;
        writer.get_ref().sync_all()
    }

    /// Rename the snapshot over the live log and reopen it. Fast phase.
    pub fn swap_compact_file(&mut self) -> io::Result<()> {
        self.writer.flush()?;
        fs::rename(Self::compact_tmp_path(&self.path), &self.path)?;
        let file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        self.writer = BufWriter::new(file);
        self.appends_since_compact = 0;
        Ok(())
    }

    #[cfg(test)]
    pub fn compact(&mut self, records: &[R]) -> io::Result<()> {
        Self::write_compact_file(&self.path, records)?;
        self.swap_compact_file()
    }

    /// Read back every intact record. A missing or empty file is an empty log;
    /// a foreign header is an error rather than silently discarded data.
    pub fn replay(path: &Path) -> io::Result<Vec<R>> {
        Ok(Self::read_log(path)?.0)
    }

    /// Replay, then cut off anything after the last intact record so new
    /// appends are not written behind a torn tail.
    pub fn recover(path: &Path) -> io::Result<Vec<R>> {
        let (records, good_len) = Self::read_log(path)?;
        let file = match OpenOptions::new().write(true).open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(records),
            Err(e) => return Err(e),
        };
        let len = file.metadata()?.len();
        if len > good_len {
            tracing::warn!(
                "truncating {} bytes of torn WAL tail in {}",
                len - good_len,
                path.display()
            );
            file.set_len(good_len)?;
            file.sync_all()?;
        }
        Ok(records)
    }

    /// Intact records plus the byte length of the log up to the last of them.
    fn read_log(path: &Path) -> io::Result<(Vec<R>, u64)> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok((Vec::new(), 0)),
            Err(e) => return Err(e),
        };
        let mut reader = BufReader::new(file);

        let mut header = [0u8; HEADER_LEN];
        if !read_or_eof(&mut reader, &mut header)? {
            return Ok((Vec::new(), 0));
        }
        if &header[..MAGIC.len()] != MAGIC {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "not a chairtime WAL"));
        }
        let version = u16::from_le_bytes([header[4], header[5]]);
        if version != FORMAT_VERSION {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("unsupported WAL format version {version}"),
            ));
        }

        let mut records = Vec::new();
        let mut good_len = HEADER_LEN as u64;
        loop {
            let mut len_buf = [0u8; 4];
            if !read_or_eof(&mut reader, &mut len_buf)? {
                break;
            }
            let len = u32::from_le_bytes(len_buf);
            if len > MAX_RECORD_LEN {
                break;
            }
            let mut payload = vec![0u8; len as usize];
            if !read_or_eof(&mut reader, &mut payload)? {
                break;
            }
            let mut crc_buf = [0u8; 4];
            if !read_or_eof(&mut reader, &mut crc_buf)? {
                break;
            }
            if u32::from_le_bytes(crc_buf) != crc32fast::hash(&payload) {
                break;
            }
            match bincode::deserialize::<R>(&payload) {
                Ok(record) => records.push(record),
                Err(_) => break,
            }
            good_len += 8 + u64::from(len);
        }
        Ok((records, good_len))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Event, WeeklyTemplate};
    use chrono::NaiveDate;
    use ulid::Ulid;

    fn tmp_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("chairtime_test_wal");
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = fs::remove_file(&path);
        path
    }

    fn provider_created() -> Event {
        Event::ProviderCreated {
            id: Ulid::new(),
            name: Some("Anna".into()),
            template: WeeklyTemplate::default(),
        }
    }

    fn override_set(provider_id: Ulid) -> Event {
        Event::OverrideSet {
            provider_id,
            date: NaiveDate::from_ymd_opt(2024, 3, 8).unwrap(),
            working: false,
        }
    }

    #[test]
    fn new_file_starts_with_header() {
        let path = tmp_path("header.wal");
        {
            let _wal = Wal::<Event>::open(&path).unwrap();
        }
        let bytes = fs::read(&path).unwrap();
        assert_eq!(bytes.len(), HEADER_LEN);
        assert_eq!(&bytes[..4], MAGIC);
        assert!(Wal::<Event>::replay(&path).unwrap().is_empty());
    }

    #[test]
    fn reopen_does_not_duplicate_header() {
        let path = tmp_path("reopen.wal");
        let first = provider_created();
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&first).unwrap();
        }
        let second = override_set(Ulid::new());
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&second).unwrap();
        }
        assert_eq!(Wal::<Event>::replay(&path).unwrap(), vec![first, second]);
    }

    #[test]
    fn replay_drops_torn_tail() {
        let path = tmp_path("torn.wal");
        let event = provider_created();
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&event).unwrap();
        }
        {
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&[9u8, 0, 0, 0, 1, 2]).unwrap(); // length says 9, only 2 follow
        }
        assert_eq!(Wal::<Event>::replay(&path).unwrap(), vec![event]);
    }

    #[test]
    fn recover_truncates_torn_tail_before_appending() {
        let path = tmp_path("recover.wal");
        let first = provider_created();
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&first).unwrap();
        }
        let intact_len = fs::metadata(&path).unwrap().len();
        {
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&[40u8, 0, 0, 0, 1, 2]).unwrap();
        }

        assert_eq!(Wal::<Event>::recover(&path).unwrap(), vec![first.clone()]);
        assert_eq!(fs::metadata(&path).unwrap().len(), intact_len);

        let second = override_set(Ulid::new());
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&second).unwrap();
        }
        assert_eq!(Wal::<Event>::replay(&path).unwrap(), vec![first, second]);
    }

    #[test]
    fn recover_resets_partial_header() {
        let path = tmp_path("partial_header.wal");
        fs::write(&path, &MAGIC[..2]).unwrap();
        assert!(Wal::<Event>::recover(&path).unwrap().is_empty());
        assert_eq!(fs::metadata(&path).unwrap().len(), 0);

        let event = provider_created();
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&event).unwrap();
        }
        assert_eq!(Wal::<Event>::replay(&path).unwrap(), vec![event]);
    }

    #[test]
    fn recover_leaves_clean_log_alone() {
        let path = tmp_path("recover_clean.wal");
        let event = provider_created();
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&event).unwrap();
        }
        let len = fs::metadata(&path).unwrap().len();
        assert_eq!(Wal::<Event>::recover(&path).unwrap(), vec![event]);
        assert_eq!(fs::metadata(&path).unwrap().len(), len);
        assert!(Wal::<Event>::recover(&tmp_path("recover_missing.wal")).unwrap().is_empty());
    }

    #[test]
    fn replay_stops_at_bad_crc() {
        let path = tmp_path("bad_crc.wal");
        let good = provider_created();
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&good).unwrap();
        }
        {
            let payload = bincode::serialize(&override_set(Ulid::new())).unwrap();
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&(payload.len() as u32).to_le_bytes()).unwrap();
            f.write_all(&payload).unwrap();
            f.write_all(&0xDEADBEEFu32.to_le_bytes()).unwrap();
        }
        assert_eq!(Wal::<Event>::replay(&path).unwrap(), vec![good]);
    }

    #[test]
    fn replay_missing_file_is_empty() {
        let path = tmp_path("missing.wal");
        assert!(Wal::<Event>::replay(&path).unwrap().is_empty());
    }

    #[test]
    fn replay_rejects_foreign_file() {
        let path = tmp_path("foreign.wal");
        fs::write(&path, b"PGDMP\x01\x0e\x00").unwrap();
        let err = Wal::<Event>::replay(&path).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn compaction_replaces_history() {
        let path = tmp_path("compact.wal");
        let pid = Ulid::new();
        {
            let mut wal = Wal::open(&path).unwrap();
            for _ in 0..20 {
                wal.append(&override_set(pid)).unwrap();
                wal.append(&Event::OverrideCleared {
                    provider_id: pid,
                    date: NaiveDate::from_ymd_opt(2024, 3, 8).unwrap(),
                })
                .unwrap();
            }
        }
        let before = fs::metadata(&path).unwrap().len();

        let snapshot = vec![provider_created()];
        let after_event = override_set(pid);
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.compact(&snapshot).unwrap();
            assert_eq!(wal.appends_since_compact(), 0);
            wal.append(&after_event).unwrap();
        }

        let after = fs::metadata(&path).unwrap().len();
        assert!(after < before, "compacted WAL should shrink: {after} < {before}");
        let replayed = Wal::<Event>::replay(&path).unwrap();
        assert_eq!(replayed, vec![snapshot[0].clone(), after_event]);
    }

    #[test]
    fn buffered_appends_are_counted_and_durable_after_flush() {
        let path = tmp_path("buffered.wal");
        let events: Vec<Event> = (0..5).map(|_| provider_created()).collect();
        {
            let mut wal = Wal::open(&path).unwrap();
            for e in &events {
                wal.append_buffered(e).unwrap();
            }
            assert_eq!(wal.appends_since_compact(), 5);
            wal.flush_sync().unwrap();
        }
        assert_eq!(Wal::<Event>::replay(&path).unwrap(), events);
    }
}
