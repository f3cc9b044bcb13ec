//! Journal — append-only compressed record log, the durability source of
//! truth.
//!
//! On-disk layout is a sequence of self-contained frames, one per event:
//!
//! ```text
//! [len: u32 LE][checksum: 8 bytes][body: len bytes]
//! ```
//!
//! `body` is one zstd frame holding the JSON-encoded [`JournalEntry`];
//! `checksum` is the leading 8 bytes of SHA-256 over `body`. Because each
//! record is an independent zstd frame, the file stays appendable without
//! decompressing or rewriting prior content.
//!
//! Opening scans all frames from offset 0. A short or checksum-mismatched
//! frame at the tail is an uncommitted write (crash mid-append): the file is
//! truncated back to the last good frame, the event is logged, and numbering
//! resumes after the last committed entry. Prior entries are never touched.

use sha2::{Digest, Sha256};
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::error::{AuditError, Result};
use crate::types::{Event, JournalEntry};

const FRAME_HEADER_LEN: u64 = 12;
/// Sanity bound on a single compressed record; anything larger is treated as
/// a corrupt length prefix rather than a real frame.
const MAX_FRAME_BODY: u32 = 64 * 1024 * 1024;
const COMPRESSION_LEVEL: i32 = 3;

fn frame_checksum(body: &[u8]) -> [u8; 8] {
    let mut hasher = Sha256::new();
    hasher.update(body);
    let digest = hasher.finalize();
    let mut out = [0u8; 8];
    out.copy_from_slice(&digest[..8]);
    out
}

fn encode_body(entry: &JournalEntry) -> Result<Vec<u8>> {
    let json = serde_json::to_vec(entry)?;
    zstd::encode_all(&json[..], COMPRESSION_LEVEL)
        .map_err(|e| AuditError::JournalWrite(format!("compression failed: {e}")))
}

fn decode_body(body: &[u8]) -> Result<JournalEntry> {
    let json = zstd::decode_all(body)
        .map_err(|e| AuditError::JournalWrite(format!("decompression failed: {e}")))?;
    Ok(serde_json::from_slice(&json)?)
}

/// Exclusive append handle over one journal file.
///
/// One writer exists per journal; callers serialize access externally (the
/// coordinator holds it behind a mutex). `append` writes through to disk
/// before returning, so a returned `sequence_id` survives a crash.
pub struct JournalWriter {
    path: PathBuf,
    file: File,
    /// Byte offset of the first position past the last committed frame.
    end_offset: u64,
    next_seq: u64,
}

impl JournalWriter {
    /// Open or create the journal at `path`, recovering from a corrupt tail.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)?;

        let scan = scan_committed(&mut file)?;
        if let Some(offset) = scan.truncated_at {
            let cause = AuditError::CorruptTail { offset };
            warn!(
                path = %path.display(),
                error = %cause,
                "dropping uncommitted journal tail"
            );
            file.set_len(scan.valid_len)?;
            file.sync_all()?;
        }
        file.seek(SeekFrom::Start(scan.valid_len))?;
        debug!(
            path = %path.display(),
            entries = scan.next_seq,
            "journal opened"
        );

        Ok(Self {
            path: path.to_path_buf(),
            file,
            end_offset: scan.valid_len,
            next_seq: scan.next_seq,
        })
    }

    /// The sequence number the next `append` will assign.
    pub fn next_sequence_id(&self) -> u64 {
        self.next_seq
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Serialize, frame, and durably append one event, assigning the next
    /// sequence number. The entry is on disk (fsynced) before this returns.
    pub fn append(&mut self, event: &Event) -> Result<JournalEntry> {
        let entry = JournalEntry {
            sequence_id: self.next_seq,
            event: event.clone(),
        };
        let body = encode_body(&entry)?;
        if body.len() > MAX_FRAME_BODY as usize {
            return Err(AuditError::JournalWrite(format!(
                "record too large: {} bytes",
                body.len()
            )));
        }

        let mut frame = Vec::with_capacity(FRAME_HEADER_LEN as usize + body.len());
        frame.extend_from_slice(&(body.len() as u32).to_le_bytes());
        frame.extend_from_slice(&frame_checksum(&body));
        frame.extend_from_slice(&body);

        let write = self
            .file
            .write_all(&frame)
            .and_then(|_| self.file.sync_all());
        if let Err(e) = write {
            // Roll the file back so a partial frame never sits under the
            // write cursor of a still-live writer.
            let _ = self.file.set_len(self.end_offset);
            let _ = self.file.seek(SeekFrom::Start(self.end_offset));
            return Err(AuditError::JournalWrite(e.to_string()));
        }

        self.end_offset += frame.len() as u64;
        self.next_seq += 1;
        Ok(entry)
    }

    /// Lazy scan of committed entries with `sequence_id >= start`. The
    /// iterator owns its own file handle, so it can be dropped early (a
    /// disconnected caller costs nothing) and restarted from any offset.
    pub fn read_from(&self, start: u64) -> Result<JournalReader> {
        JournalReader::open(&self.path, start)
    }

    /// Force buffered state to disk. Appends already write through; this is
    /// the explicit hook the shutdown sequencer calls.
    pub fn flush(&mut self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }
}

struct ScanOutcome {
    valid_len: u64,
    next_seq: u64,
    /// Offset of the first bad byte, when the tail did not validate.
    truncated_at: Option<u64>,
}

/// Walk frames from offset 0, validating length, checksum, and sequence
/// continuity. Returns how far the committed prefix extends.
fn scan_committed(file: &mut File) -> Result<ScanOutcome> {
    let file_len = file.metadata()?.len();
    file.seek(SeekFrom::Start(0))?;
    let mut reader = BufReader::new(&mut *file);

    let mut offset = 0u64;
    let mut next_seq = 0u64;

    loop {
        if offset == file_len {
            return Ok(ScanOutcome {
                valid_len: offset,
                next_seq,
                truncated_at: None,
            });
        }
        match read_frame_at(&mut reader, offset, file_len) {
            Ok(Some((entry, frame_len))) => {
                if entry.sequence_id != next_seq {
                    warn!(
                        offset,
                        expected = next_seq,
                        found = entry.sequence_id,
                        "journal sequence discontinuity"
                    );
                    return Ok(ScanOutcome {
                        valid_len: offset,
                        next_seq,
                        truncated_at: Some(offset),
                    });
                }
                offset += frame_len;
                next_seq += 1;
            }
            Ok(None) | Err(_) => {
                return Ok(ScanOutcome {
                    valid_len: offset,
                    next_seq,
                    truncated_at: Some(offset),
                });
            }
        }
    }
}

/// Read and validate one frame starting at `offset`. `Ok(None)` means the
/// bytes from `offset` do not form a committed frame (short or corrupt).
/// The reader must already be positioned at `offset`.
fn read_frame_at<R: Read>(
    reader: &mut R,
    offset: u64,
    file_len: u64,
) -> Result<Option<(JournalEntry, u64)>> {
    let remaining = file_len - offset;
    if remaining < FRAME_HEADER_LEN {
        return Ok(None);
    }

    let mut header = [0u8; FRAME_HEADER_LEN as usize];
    reader.read_exact(&mut header)?;
    let body_len = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
    if body_len > MAX_FRAME_BODY || u64::from(body_len) > remaining - FRAME_HEADER_LEN {
        return Ok(None);
    }

    let mut body = vec![0u8; body_len as usize];
    reader.read_exact(&mut body)?;
    if frame_checksum(&body)[..] != header[4..12] {
        return Ok(None);
    }

    let entry = match decode_body(&body) {
        Ok(entry) => entry,
        Err(_) => return Ok(None),
    };
    Ok(Some((entry, FRAME_HEADER_LEN + u64::from(body_len))))
}

/// Forward scan over committed journal entries.
///
/// Stops cleanly (yields `None`) at a short or corrupt tail; it never
/// surfaces a partial frame as data.
pub struct JournalReader {
    reader: BufReader<File>,
    offset: u64,
    file_len: u64,
    start_seq: u64,
    done: bool,
}

impl JournalReader {
    fn open(path: &Path, start_seq: u64) -> Result<Self> {
        let file = File::open(path)?;
        let file_len = file.metadata()?.len();
        Ok(Self {
            reader: BufReader::new(file),
            offset: 0,
            file_len,
            start_seq,
            done: false,
        })
    }
}

impl Iterator for JournalReader {
    type Item = Result<JournalEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.done || self.offset >= self.file_len {
                return None;
            }
            match read_frame_at(&mut self.reader, self.offset, self.file_len) {
                Ok(Some((entry, frame_len))) => {
                    self.offset += frame_len;
                    if entry.sequence_id < self.start_seq {
                        continue;
                    }
                    return Some(Ok(entry));
                }
                Ok(None) | Err(_) => {
                    // Uncommitted tail; stop without error so prior entries
                    // remain usable.
                    self.done = true;
                    return None;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{FieldMap, FieldValue};
    use chrono::Utc;
    use tempfile::tempdir;

    fn sample_event(n: i64) -> Event {
        let mut payload = FieldMap::new();
        payload.insert("value".to_string(), FieldValue::Int(n));
        Event {
            source: "demo".to_string(),
            payload,
            parsed: None,
            payload_sha256: String::new(),
            captured_at: Utc::now(),
            captured_mono_ns: 0,
        }
    }

    #[test]
    fn appends_assign_contiguous_sequence_ids() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("audit.journal");
        let mut journal = JournalWriter::open(&path).unwrap();
        for expect in 0..3 {
            let entry = journal.append(&sample_event(expect as i64)).unwrap();
            assert_eq!(entry.sequence_id, expect);
        }
        assert_eq!(journal.next_sequence_id(), 3);
    }

    #[test]
    fn reopen_resumes_numbering() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("audit.journal");
        {
            let mut journal = JournalWriter::open(&path).unwrap();
            journal.append(&sample_event(0)).unwrap();
            journal.append(&sample_event(1)).unwrap();
        }
        let mut journal = JournalWriter::open(&path).unwrap();
        assert_eq!(journal.next_sequence_id(), 2);
        let entry = journal.append(&sample_event(2)).unwrap();
        assert_eq!(entry.sequence_id, 2);
    }

    #[test]
    fn read_from_is_restartable_at_any_offset() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("audit.journal");
        let mut journal = JournalWriter::open(&path).unwrap();
        for n in 0..5 {
            journal.append(&sample_event(n)).unwrap();
        }
        let all: Vec<_> = journal
            .read_from(0)
            .unwrap()
            .collect::<Result<Vec<_>>>()
            .unwrap();
        assert_eq!(all.len(), 5);
        let suffix: Vec<_> = journal
            .read_from(3)
            .unwrap()
            .collect::<Result<Vec<_>>>()
            .unwrap();
        assert_eq!(suffix.len(), 2);
        assert_eq!(suffix[0].sequence_id, 3);
    }

    #[test]
    fn partial_tail_is_dropped_on_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("audit.journal");
        {
            let mut journal = JournalWriter::open(&path).unwrap();
            journal.append(&sample_event(0)).unwrap();
            journal.append(&sample_event(1)).unwrap();
        }
        // Simulate a crash mid-append: half a frame header plus garbage.
        {
            let mut file = OpenOptions::new().append(true).open(&path).unwrap();
            file.write_all(&[0x40, 0x00, 0x00]).unwrap();
        }
        let mut journal = JournalWriter::open(&path).unwrap();
        assert_eq!(journal.next_sequence_id(), 2);
        let entries: Vec<_> = journal
            .read_from(0)
            .unwrap()
            .collect::<Result<Vec<_>>>()
            .unwrap();
        assert_eq!(entries.len(), 2);
        // Appending after recovery keeps numbering contiguous.
        let entry = journal.append(&sample_event(2)).unwrap();
        assert_eq!(entry.sequence_id, 2);
    }

    #[test]
    fn corrupted_tail_checksum_is_not_surfaced() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("audit.journal");
        let frame_end;
        {
            let mut journal = JournalWriter::open(&path).unwrap();
            journal.append(&sample_event(0)).unwrap();
            frame_end = journal.end_offset;
            journal.append(&sample_event(1)).unwrap();
        }
        // Flip a byte inside the second frame's body.
        {
            let mut file = OpenOptions::new().read(true).write(true).open(&path).unwrap();
            file.seek(SeekFrom::Start(frame_end + FRAME_HEADER_LEN + 2))
                .unwrap();
            let mut byte = [0u8; 1];
            file.read_exact(&mut byte).unwrap();
            file.seek(SeekFrom::Start(frame_end + FRAME_HEADER_LEN + 2))
                .unwrap();
            file.write_all(&[byte[0] ^ 0xFF]).unwrap();
        }
        let journal = JournalWriter::open(&path).unwrap();
        assert_eq!(journal.next_sequence_id(), 1);
        let entries: Vec<_> = journal
            .read_from(0)
            .unwrap()
            .collect::<Result<Vec<_>>>()
            .unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].sequence_id, 0);
    }

    #[test]
    fn tail_recovery_names_the_corrupt_offset() {
        let e = AuditError::CorruptTail { offset: 42 };
        assert_eq!(e.kind(), "corrupt_tail");
        assert!(e.to_string().contains("42"));
    }

    #[test]
    fn reader_stops_cleanly_at_live_writer_tail_garbage() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("audit.journal");
        let mut journal = JournalWriter::open(&path).unwrap();
        journal.append(&sample_event(0)).unwrap();
        // Garbage appended out-of-band must not break an in-flight reader.
        {
            let mut file = OpenOptions::new().append(true).open(&path).unwrap();
            file.write_all(b"\xde\xad\xbe\xef").unwrap();
        }
        let entries: Vec<_> = journal
            .read_from(0)
            .unwrap()
            .collect::<Result<Vec<_>>>()
            .unwrap();
        assert_eq!(entries.len(), 1);
    }
}
