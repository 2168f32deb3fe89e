//! Append-only message log.
//!
//! Frame layout (little endian):
//!
//! ```text
//! magic(4) version(1) flags(1) id(8) sent_at(8) body_len(4) body(body_len) crc32(4)
//! ```
//!
//! The body is the JSON encoding of the posted [`MessageInput`]; the checksum
//! covers the body.

use crate::error::{FeedError, Result};
use crate::types::{Message, MessageId, MessageInput, Timestamp};
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Magic bytes for message frames.
const LOG_MAGIC: &[u8; 4] = b"MSG\0";

/// Current log format version.
const LOG_VERSION: u8 = 1;

/// Frame header size (fixed part).
const FRAME_HEADER_SIZE: u64 = 4 + 1 + 1 + 8 + 8 + 4;

const CHECKSUM_SIZE: u64 = 4;

struct LogInner {
    file: File,
    next_id: u64,
    last_sent_at: Timestamp,
    /// Current file size (for appending).
    size: u64,
    writes_since_sync: u64,
    #[cfg(test)]
    fail_next_sync: bool,
}

impl LogInner {
    /// Write a frame at `offset`, optionally syncing. Nothing in `self`
    /// changes; the caller commits or rolls back.
    fn write_frame(&mut self, offset: u64, frame: &[u8], sync: bool) -> Result<()> {
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(frame)?;

        if sync {
            #[cfg(test)]
            if std::mem::take(&mut self.fail_next_sync) {
                return Err(std::io::Error::new(std::io::ErrorKind::Other, "sync failed").into());
            }
            self.file.sync_all()?;
        }
        Ok(())
    }
}

/// Append-only message log.
pub struct MessageLog {
    path: PathBuf,
    inner: Mutex<LogInner>,
    /// Sync every N writes.
    sync_interval: u64,
}

impl MessageLog {
    /// Default sync interval.
    pub const DEFAULT_SYNC_INTERVAL: u64 = 100;

    /// Open or create a log, returning it along with the `(id, offset)` of
    /// every intact frame in file order.
    ///
    /// A frame cut short at the end of the file (a write interrupted by a
    /// crash) is truncated away. Damage anywhere else is an error.
    pub fn open(
        path: impl AsRef<Path>,
        sync_interval: u64,
    ) -> Result<(Self, Vec<(MessageId, u64)>)> {
        let path = path.as_ref().to_path_buf();

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)?;

        let (entries, last_sent_at, size) = Self::scan(&mut file)?;
        let next_id = entries.last().map_or(1, |(id, _)| id.0 + 1);

        let log = Self {
            path,
            inner: Mutex::new(LogInner {
                file,
                next_id,
                last_sent_at,
                size,
                writes_since_sync: 0,
                #[cfg(test)]
                fail_next_sync: false,
            }),
            sync_interval: sync_interval.max(1),
        };

        Ok((log, entries))
    }

    /// Append a message, assigning the next id and a `sent_at` no earlier
    /// than the previous one.
    ///
    /// Returns the message and the offset where it was written.
    pub fn append(&self, input: MessageInput) -> Result<(Message, u64)> {
        let mut inner = self.inner.lock();

        let id = MessageId(inner.next_id);
        let sent_at = Timestamp::now_not_before(inner.last_sent_at);

        let frame = encode_frame(id, sent_at, &input)?;
        let offset = inner.size;
        let sync = inner.writes_since_sync + 1 >= self.sync_interval;

        if let Err(e) = inner.write_frame(offset, &frame, sync) {
            tracing::error!(id = id.0, offset, error = %e, "append failed, rolling back");
            // Drop whatever part of the frame reached the file
            if let Err(trim) = inner.file.set_len(offset) {
                tracing::error!(offset, error = %trim, "could not trim failed append");
            }
            return Err(e);
        }

        inner.size = offset + frame.len() as u64;
        inner.next_id += 1;
        inner.last_sent_at = sent_at;
        inner.writes_since_sync = if sync { 0 } else { inner.writes_since_sync + 1 };

        Ok((input.into_message(id, sent_at), offset))
    }

    /// Read the message stored at `offset`.
    pub fn read_at(&self, offset: u64) -> Result<Message> {
        let mut inner = self.inner.lock();
        inner.file.seek(SeekFrom::Start(offset))?;
        let (message, _) = read_frame(&mut inner.file)?;
        Ok(message)
    }

    /// Force sync all pending writes to disk.
    pub fn sync(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.file.sync_all()?;
        inner.writes_since_sync = 0;
        Ok(())
    }

    /// Current file size.
    pub fn size(&self) -> u64 {
        self.inner.lock().size
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn scan(file: &mut File) -> Result<(Vec<(MessageId, u64)>, Timestamp, u64)> {
        let file_size = file.metadata()?.len();
        file.seek(SeekFrom::Start(0))?;

        let mut entries = Vec::new();
        let mut last_sent_at = Timestamp(0);
        let mut offset = 0u64;

        while offset < file_size {
            if let FrameAt::Torn = inspect_frame(file, offset, file_size)? {
                tracing::warn!(
                    offset,
                    file_size,
                    "truncating incomplete frame at end of message log"
                );
                file.set_len(offset)?;
                file.sync_all()?;
                break;
            }

            file.seek(SeekFrom::Start(offset))?;
            let (message, len) = read_frame(file)?;

            if let Some((prev, _)) = entries.last() {
                if message.id <= *prev {
                    return Err(FeedError::Corruption(format!(
                        "message id {} follows {} at offset {}",
                        message.id, prev, offset
                    )));
                }
            }

            last_sent_at = last_sent_at.max(message.sent_at);
            entries.push((message.id, offset));
            offset += len;
        }

        Ok((entries, last_sent_at, offset))
    }
}

enum FrameAt {
    Complete,
    /// Cut short by the end of the file.
    Torn,
}

/// Classify the frame starting at `offset`.
///
/// A frame is torn only if its header bytes are valid as far as they go and
/// nothing resembling another frame follows it. A frame whose length runs
/// past the end while later frames exist has a damaged header.
fn inspect_frame(file: &mut File, offset: u64, file_size: u64) -> Result<FrameAt> {
    let header_len = (file_size - offset).min(FRAME_HEADER_SIZE) as usize;
    let mut header = [0u8; FRAME_HEADER_SIZE as usize];
    file.seek(SeekFrom::Start(offset))?;
    file.read_exact(&mut header[..header_len])?;

    let magic_len = header_len.min(LOG_MAGIC.len());
    if header[..magic_len] != LOG_MAGIC[..magic_len] {
        return Err(FeedError::Corruption(format!(
            "invalid frame magic at offset {}",
            offset
        )));
    }
    if header_len > 4 && header[4] != LOG_VERSION {
        return Err(FeedError::InvalidFormat(format!(
            "Unsupported log version {} at offset {}",
            header[4], offset
        )));
    }
    if header_len < FRAME_HEADER_SIZE as usize {
        return Ok(FrameAt::Torn);
    }

    let body_len = u32::from_le_bytes(le_array(&header[22..26])) as u64;
    if offset + FRAME_HEADER_SIZE + body_len + CHECKSUM_SIZE <= file_size {
        return Ok(FrameAt::Complete);
    }

    // JSON bodies never contain a NUL byte, so the magic cannot occur inside
    // a torn frame's own body.
    let mut rest = Vec::new();
    file.read_to_end(&mut rest)?;
    if rest.windows(LOG_MAGIC.len()).any(|w| w == LOG_MAGIC) {
        return Err(FeedError::Corruption(format!(
            "frame at offset {} claims {} body bytes but more frames follow",
            offset, body_len
        )));
    }

    Ok(FrameAt::Torn)
}

fn encode_frame(id: MessageId, sent_at: Timestamp, input: &MessageInput) -> Result<Vec<u8>> {
    let body = serde_json::to_vec(input)?;
    let body_len = u32::try_from(body.len())
        .map_err(|_| FeedError::InvalidMessage(format!("body of {} bytes", body.len())))?;

    let mut frame = Vec::with_capacity(FRAME_HEADER_SIZE as usize + body.len() + 4);
    frame.extend_from_slice(LOG_MAGIC);
    frame.push(LOG_VERSION);
    // Flags (reserved)
    frame.push(0u8);
    frame.extend_from_slice(&id.0.to_le_bytes());
    frame.extend_from_slice(&sent_at.0.to_le_bytes());
    frame.extend_from_slice(&body_len.to_le_bytes());
    frame.extend_from_slice(&body);
    frame.extend_from_slice(&crc32fast::hash(&body).to_le_bytes());

    Ok(frame)
}

/// Read one frame at the current position. Returns the message and the
/// frame length in bytes.
fn read_frame(file: &mut File) -> Result<(Message, u64)> {
    let mut header = [0u8; FRAME_HEADER_SIZE as usize];
    file.read_exact(&mut header)?;

    if &header[0..4] != LOG_MAGIC {
        return Err(FeedError::Corruption("invalid frame magic".into()));
    }
    if header[4] != LOG_VERSION {
        return Err(FeedError::InvalidFormat(format!(
            "Unsupported log version: {}",
            header[4]
        )));
    }

    let id = MessageId(u64::from_le_bytes(le_array(&header[6..14])));
    let sent_at = Timestamp(i64::from_le_bytes(le_array(&header[14..22])));
    let body_len = u32::from_le_bytes(le_array(&header[22..26])) as usize;

    let mut body = vec![0u8; body_len];
    file.read_exact(&mut body)?;

    let mut checksum_bytes = [0u8; 4];
    file.read_exact(&mut checksum_bytes)?;
    let stored_checksum = u32::from_le_bytes(checksum_bytes);
    let computed_checksum = crc32fast::hash(&body);

    if stored_checksum != computed_checksum {
        return Err(FeedError::ChecksumMismatch {
            expected: stored_checksum,
            got: computed_checksum,
        });
    }

    let input: MessageInput = serde_json::from_slice(&body)?;
    let len = FRAME_HEADER_SIZE + body_len as u64 + CHECKSUM_SIZE;

    Ok((input.into_message(id, sent_at), len))
}

fn le_array<const N: usize>(bytes: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(bytes);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Author, ContentType};
    use tempfile::TempDir;

    fn input(text: &str) -> MessageInput {
        MessageInput::plain(Author::new("ann", "a.png"), text)
    }

    #[test]
    fn test_append_and_read() {
        let dir = TempDir::new().unwrap();
        let (log, entries) = MessageLog::open(dir.path().join("messages.log"), 1).unwrap();
        assert!(entries.is_empty());

        let (message, offset) = log.append(input("hello")).unwrap();
        assert_eq!(message.id, MessageId(1));
        assert_eq!(offset, 0);

        let read = log.read_at(offset).unwrap();
        assert_eq!(read, message);
    }

    #[test]
    fn test_reopen_continues_ids() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("messages.log");

        let last_sent_at = {
            let (log, _) = MessageLog::open(&path, 100).unwrap();
            let mut last = Timestamp(0);
            for i in 1..=5 {
                last = log.append(input(&format!("m{}", i))).unwrap().0.sent_at;
            }
            log.sync().unwrap();
            last
        };

        let (log, entries) = MessageLog::open(&path, 100).unwrap();
        assert_eq!(entries.len(), 5);
        assert_eq!(entries[4].0, MessageId(5));

        let (message, _) = log.append(input("m6")).unwrap();
        assert_eq!(message.id, MessageId(6));
        assert!(message.sent_at >= last_sent_at);
    }

    #[test]
    fn test_torn_tail_is_truncated() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("messages.log");

        let good_size = {
            let (log, _) = MessageLog::open(&path, 1).unwrap();
            log.append(input("one")).unwrap();
            log.append(input("two")).unwrap();
            log.size()
        };

        // Half a header
        {
            let mut file = OpenOptions::new().append(true).open(&path).unwrap();
            file.write_all(&LOG_MAGIC[..]).unwrap();
            file.write_all(&[LOG_VERSION, 0, 3, 0]).unwrap();
        }

        let (log, entries) = MessageLog::open(&path, 1).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(log.size(), good_size);
        assert_eq!(std::fs::metadata(&path).unwrap().len(), good_size);
    }

    #[test]
    fn test_checksum_mismatch_detected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("messages.log");

        {
            let (log, _) = MessageLog::open(&path, 1).unwrap();
            log.append(input("precious")).unwrap();
        }

        // Flip a byte inside the body
        let mut bytes = std::fs::read(&path).unwrap();
        let body_start = FRAME_HEADER_SIZE as usize;
        bytes[body_start + 3] ^= 0xff;
        std::fs::write(&path, &bytes).unwrap();

        let result = MessageLog::open(&path, 1);
        assert!(matches!(result, Err(FeedError::ChecksumMismatch { .. })));
    }

    #[test]
    fn test_damaged_length_mid_log_fails_open() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("messages.log");

        let second = {
            let (log, _) = MessageLog::open(&path, 1).unwrap();
            let offsets: Vec<_> = (1..=5)
                .map(|i| log.append(input(&format!("m{}", i))).unwrap().1)
                .collect();
            offsets[1]
        };

        // High byte of the second frame's body_len
        let mut bytes = std::fs::read(&path).unwrap();
        let size_before = bytes.len() as u64;
        bytes[(second + FRAME_HEADER_SIZE - 1) as usize] = 0x7f;
        std::fs::write(&path, &bytes).unwrap();

        let result = MessageLog::open(&path, 1);
        assert!(matches!(result, Err(FeedError::Corruption(_))));
        assert_eq!(std::fs::metadata(&path).unwrap().len(), size_before);
    }

    #[test]
    fn test_torn_body_is_truncated() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("messages.log");

        let good_size = {
            let (log, _) = MessageLog::open(&path, 1).unwrap();
            log.append(input("one")).unwrap();
            log.size()
        };

        // A whole second frame minus its last few bytes
        let frame = encode_frame(MessageId(2), Timestamp(5), &input("two")).unwrap();
        {
            let mut file = OpenOptions::new().append(true).open(&path).unwrap();
            file.write_all(&frame[..frame.len() - 3]).unwrap();
        }

        let (log, entries) = MessageLog::open(&path, 1).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(log.size(), good_size);
        assert_eq!(log.append(input("two again")).unwrap().0.id, MessageId(2));
    }

    #[test]
    fn test_failed_sync_rolls_back_append() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("messages.log");

        {
            let (log, _) = MessageLog::open(&path, 1).unwrap();
            log.append(input("m1")).unwrap();
            let size = log.size();

            log.inner.lock().fail_next_sync = true;
            assert!(matches!(log.append(input("lost")), Err(FeedError::Io(_))));
            assert_eq!(log.size(), size);
            assert_eq!(std::fs::metadata(log.path()).unwrap().len(), size);

            // The failed id is reused, so nothing is skipped
            assert_eq!(log.append(input("m2")).unwrap().0.id, MessageId(2));
        }

        let (log, entries) = MessageLog::open(&path, 1).unwrap();
        let contents: Vec<_> = entries
            .iter()
            .map(|(_, offset)| log.read_at(*offset).unwrap().content)
            .collect();
        assert_eq!(contents, vec!["m1", "m2"]);
    }

    #[test]
    fn test_content_type_survives() {
        let dir = TempDir::new().unwrap();
        let (log, _) = MessageLog::open(dir.path().join("messages.log"), 1).unwrap();

        let md = MessageInput::markdown(Author::new("bob", "b.png"), "# title");
        let (_, offset) = log.append(md).unwrap();

        assert_eq!(log.read_at(offset).unwrap().content_type, ContentType::Markdown);
    }
}
