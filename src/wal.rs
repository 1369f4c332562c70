//! Append-only reservation log.
//!
//! Each entry is `[u32 len][bincode Event][u32 crc32]`, little-endian, with
//! `len` counting the payload only. Reading stops at the first entry that is
//! short, oversized, fails its checksum or does not decode; everything from
//! there on is the log's tail and is cut off when the log is reopened.

use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::model::Event;

/// Payloads larger than this can only come from a corrupt length prefix.
const MAX_ENTRY_LEN: usize = 64 * 1024;

/// Bytes an entry occupies besides its payload.
const FRAME_OVERHEAD: u64 = 8;

fn write_entry(out: &mut impl Write, event: &Event) -> io::Result<()> {
    let payload =
        bincode::serialize(event).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let len = u32::try_from(payload.len())
        .ok()
        .filter(|&n| n as usize <= MAX_ENTRY_LEN)
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "WAL entry too large"))?;
    out.write_all(&len.to_le_bytes())?;
    out.write_all(&payload)?;
    out.write_all(&crc32fast::hash(&payload).to_le_bytes())
}

/// Why reading stopped before the end of the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Damage {
    Torn,
    Oversized(usize),
    Checksum,
    Undecodable,
}

impl fmt::Display for Damage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Damage::Torn => write!(f, "torn entry"),
            Damage::Oversized(len) => write!(f, "length {len} over limit"),
            Damage::Checksum => write!(f, "checksum mismatch"),
            Damage::Undecodable => write!(f, "undecodable payload"),
        }
    }
}

/// Sequential reader that remembers how far the log is intact.
struct EntryReader<R> {
    inner: R,
    intact: u64,
    damage: Option<Damage>,
}

impl<R: Read> EntryReader<R> {
    fn new(inner: R) -> Self {
        Self {
            inner,
            intact: 0,
            damage: None,
        }
    }

    /// `Ok(false)` when the source ran dry before `buf` was full.
    fn fill(&mut self, buf: &mut [u8]) -> io::Result<bool> {
        match self.inner.read_exact(buf) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn next_event(&mut self) -> io::Result<Option<Event>> {
        if self.damage.is_some() {
            return Ok(None);
        }

        let mut len_buf = [0u8; 4];
        match self.inner.read(&mut len_buf[..1])? {
            0 => return Ok(None),
            _ if !self.fill(&mut len_buf[1..])? => return self.stop(Damage::Torn),
            _ => {}
        }
        let len = u32::from_le_bytes(len_buf) as usize;
        if len > MAX_ENTRY_LEN {
            return self.stop(Damage::Oversized(len));
        }

        let mut payload = vec![0u8; len];
        let mut crc_buf = [0u8; 4];
        if !self.fill(&mut payload)? || !self.fill(&mut crc_buf)? {
            return self.stop(Damage::Torn);
        }
        if u32::from_le_bytes(crc_buf) != crc32fast::hash(&payload) {
            return self.stop(Damage::Checksum);
        }
        let Ok(event) = bincode::deserialize::<Event>(&payload) else {
            return self.stop(Damage::Undecodable);
        };

        self.intact += len as u64 + FRAME_OVERHEAD;
        Ok(Some(event))
    }

    fn stop(&mut self, damage: Damage) -> io::Result<Option<Event>> {
        self.damage = Some(damage);
        Ok(None)
    }
}

/// What a pass over the log found.
struct Scan {
    events: Vec<Event>,
    /// Length of the prefix made of whole, verified entries.
    intact: u64,
    damage: Option<Damage>,
}

fn scan(path: &Path) -> io::Result<Scan> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Ok(Scan {
                events: Vec::new(),
                intact: 0,
                damage: None,
            });
        }
        Err(e) => return Err(e),
    };
    let mut reader = EntryReader::new(BufReader::new(file));
    let mut events = Vec::new();
    while let Some(event) = reader.next_event()? {
        events.push(event);
    }
    Ok(Scan {
        events,
        intact: reader.intact,
        damage: reader.damage,
    })
}

fn open_for_append(path: &Path) -> io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

/// Writable handle on the log. Appends are buffered until `flush_sync`.
pub struct Wal {
    writer: BufWriter<File>,
    path: PathBuf,
    appends_since_compact: u64,
}

impl Wal {
    /// Read every intact event, cut any damaged tail off the file, and open
    /// it for appending. New entries therefore always follow a valid prefix.
    pub fn recover(path: &Path) -> io::Result<(Self, Vec<Event>)> {
        let Scan {
            events,
            intact,
            damage,
        } = scan(path)?;
        if let Some(damage) = damage {
            warn!(
                "{}: damaged entry after {} intact events ({damage}), truncating to {intact} bytes",
                path.display(),
                events.len()
            );
            let file = OpenOptions::new().write(true).open(path)?;
            file.set_len(intact)?;
            file.sync_all()?;
        }
        Ok((Self::open(path)?, events))
    }

    pub fn open(path: &Path) -> io::Result<Self> {
        Ok(Self {
            writer: BufWriter::new(open_for_append(path)?),
            path: path.to_path_buf(),
            appends_since_compact: 0,
        })
    }

    /// Every intact event, in append order. A missing file reads as empty.
    pub fn replay(path: &Path) -> io::Result<Vec<Event>> {
        Ok(scan(path)?.events)
    }

    #[cfg(test)]
    pub fn append(&mut self, event: &Event) -> io::Result<()> {
        self.append_buffered(event)?;
        self.flush_sync()
    }

    pub fn append_buffered(&mut self, event: &Event) -> io::Result<()> {
        write_entry(&mut self.writer, event)?;
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

    /// Replace the log with `events`: write a sibling file, fsync it, rename
    /// it over the live log and reopen.
    pub fn rewrite(&mut self, events: &[Event]) -> io::Result<()> {
        let staging = self.path.with_extension("wal.tmp");
        {
            let mut out = BufWriter::new(File::create(&staging)?);
            for event in events {
                write_entry(&mut out, event)?;
            }
            out.flush()?;
            out.get_ref().sync_all()?;
        }
        fs::rename(&staging, &self.path)?;
        self.writer = BufWriter::new(open_for_append(&self.path)?);
        self.appends_since_compact = 0;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Candidate, Day, Reservation};
    use ulid::Ulid;

    fn fresh_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("daybook_test_wal");
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = fs::remove_file(&path);
        path
    }

    fn placed(date: &str, days: u32) -> Event {
        let date: Day = date.parse().unwrap();
        Event::placed(&Reservation::new(Ulid::new(), &Candidate::new(date, days)))
    }

    fn write_log(path: &Path, events: &[Event]) {
        let mut wal = Wal::open(path).unwrap();
        for event in events {
            wal.append(event).unwrap();
        }
    }

    fn push_bytes(path: &Path, bytes: &[u8]) {
        let mut f = OpenOptions::new().append(true).open(path).unwrap();
        f.write_all(bytes).unwrap();
    }

    #[test]
    fn events_come_back_in_order() {
        let path = fresh_path("in_order.wal");
        let stay = placed("2026-04-01", 2);
        let log = vec![
            stay.clone(),
            Event::ReservationCancelled {
                id: stay.reservation_id(),
            },
        ];
        write_log(&path, &log);
        assert_eq!(Wal::replay(&path).unwrap(), log);
    }

    #[test]
    fn missing_file_is_an_empty_log() {
        let path = fresh_path("never_written.wal");
        assert!(Wal::replay(&path).unwrap().is_empty());
        let (_, events) = Wal::recover(&path).unwrap();
        assert!(events.is_empty());
    }

    #[test]
    fn torn_tail_is_ignored() {
        let path = fresh_path("torn_tail.wal");
        let stay = placed("2026-04-01", 1);
        write_log(&path, std::slice::from_ref(&stay));
        // Claims a 40 byte payload, delivers two.
        push_bytes(&path, &[40, 0, 0, 0, 1, 2]);
        assert_eq!(Wal::replay(&path).unwrap(), vec![stay]);
    }

    #[test]
    fn bad_checksum_ends_the_log() {
        let path = fresh_path("bad_crc.wal");
        let payload = bincode::serialize(&Event::ReservationCancelled { id: Ulid::new() }).unwrap();
        let mut bytes = (payload.len() as u32).to_le_bytes().to_vec();
        bytes.extend_from_slice(&payload);
        bytes.extend_from_slice(&0xDEAD_BEEFu32.to_le_bytes());
        fs::write(&path, bytes).unwrap();
        assert!(Wal::replay(&path).unwrap().is_empty());
    }

    #[test]
    fn oversized_length_ends_the_log() {
        let path = fresh_path("oversized.wal");
        let stay = placed("2026-04-03", 1);
        write_log(&path, std::slice::from_ref(&stay));
        push_bytes(&path, &u32::MAX.to_le_bytes());
        assert_eq!(Wal::replay(&path).unwrap(), vec![stay]);
    }

    #[test]
    fn appends_after_a_torn_tail_survive_recovery() {
        let path = fresh_path("recover_then_append.wal");
        let before = placed("2026-04-01", 1);
        write_log(&path, std::slice::from_ref(&before));
        let intact_len = fs::metadata(&path).unwrap().len();
        push_bytes(&path, &[40, 0, 0, 0, 1, 2]);

        let after = placed("2026-04-06", 2);
        {
            let (mut wal, events) = Wal::recover(&path).unwrap();
            assert_eq!(events, vec![before.clone()]);
            assert_eq!(fs::metadata(&path).unwrap().len(), intact_len);
            wal.append(&after).unwrap();
        }

        let (_, events) = Wal::recover(&path).unwrap();
        assert_eq!(events, vec![before, after]);
    }

    #[test]
    fn recovery_leaves_a_clean_log_alone() {
        let path = fresh_path("clean.wal");
        let log = vec![placed("2026-04-01", 1), placed("2026-04-09", 3)];
        write_log(&path, &log);
        let len = fs::metadata(&path).unwrap().len();

        let (_, events) = Wal::recover(&path).unwrap();
        assert_eq!(events, log);
        assert_eq!(fs::metadata(&path).unwrap().len(), len);
    }

    #[test]
    fn rewrite_shrinks_churn_and_accepts_appends() {
        let path = fresh_path("rewrite.wal");
        let keeper = placed("2026-04-10", 3);
        let mut wal = Wal::open(&path).unwrap();
        wal.append(&keeper).unwrap();
        for _ in 0..10 {
            let churn = placed("2026-04-20", 1);
            wal.append(&churn).unwrap();
            wal.append(&Event::ReservationCancelled {
                id: churn.reservation_id(),
            })
            .unwrap();
        }
        assert_eq!(wal.appends_since_compact(), 21);
        let before = fs::metadata(&path).unwrap().len();

        wal.rewrite(std::slice::from_ref(&keeper)).unwrap();
        assert_eq!(wal.appends_since_compact(), 0);
        assert!(fs::metadata(&path).unwrap().len() < before);

        let later = placed("2026-04-25", 2);
        wal.append(&later).unwrap();
        assert_eq!(Wal::replay(&path).unwrap(), vec![keeper, later]);
    }

    #[test]
    fn buffered_appends_land_after_flush() {
        let path = fresh_path("buffered.wal");
        let log: Vec<Event> = (1..=5).map(|d| placed(&format!("2026-05-0{d}"), 1)).collect();
        let mut wal = Wal::open(&path).unwrap();
        for event in &log {
            wal.append_buffered(event).unwrap();
        }
        wal.flush_sync().unwrap();
        assert_eq!(Wal::replay(&path).unwrap(), log);
    }
}
