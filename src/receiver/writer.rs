//! Per-peer writer task.
//!
//! Each active peer gets one `FileWriter`: a bounded channel fed by the
//! dispatcher and a loop that drains it, interpreting the leading bytes of
//! every message as a file header and appending or truncating the named
//! output file. The file is opened and closed once per message; the sender
//! marks the first chunk `NEW` and the rest `APPEND`, so per-message
//! open/close reconstructs the file exactly.

use crate::channel::Channel;
use crate::error::TransferError;
use crate::frame::{FileHeader, FILE_HEADER_LEN, STATUS_NEW};
use bytes::Bytes;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, error, warn};

/// Depth of the dispatcher-to-writer channel.
const CHANNEL_CAPACITY: usize = 20;

/// A writer task bound to one peer's stream.
pub struct FileWriter {
    peer: String,
    output_dir: PathBuf,
    stream: Channel<Bytes>,
    finished: AtomicBool,
}

impl FileWriter {
    pub fn new(peer: &str, output_dir: &Path) -> Self {
        Self {
            peer: peer.to_string(),
            output_dir: output_dir.to_path_buf(),
            stream: Channel::bounded(CHANNEL_CAPACITY),
            finished: AtomicBool::new(false),
        }
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Dispatcher side: queue one message's payload bytes for this writer.
    /// Blocks while the channel is full, applying per-peer backpressure.
    pub fn push(&self, payload: Bytes) -> Result<(), TransferError> {
        self.stream.send(payload)
    }

    /// Dispatcher side: no more payloads will arrive. The writer drains
    /// what is buffered and exits.
    pub fn close_channel(&self) {
        self.stream.close();
    }

    /// True once the writer task has drained its channel and exited.
    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    /// Writer task body: drain the channel into files until it closes.
    ///
    /// A message too short to carry a file header is logged and skipped; a
    /// file that cannot be opened or written ends this writer (and only
    /// this writer).
    pub fn serve(&self) {
        while let Ok(message) = self.stream.recv() {
            if let Err(err) = self.write_message(&message) {
                error!(peer = %self.peer, error = %err, "writer failed, terminating task");
                break;
            }
        }
        // A dead writer must not leave the dispatcher blocking on a full
        // channel; pushes fail from here on.
        self.stream.close();
        self.finished.store(true, Ordering::Release);
        debug!(peer = %self.peer, "writer finished");
    }

    fn write_message(&self, message: &[u8]) -> Result<(), TransferError> {
        if message.len() < FILE_HEADER_LEN {
            warn!(
                peer = %self.peer,
                len = message.len(),
                "message shorter than the file header, skipping"
            );
            return Ok(());
        }
        let header = FileHeader::decode(message)?;
        let path = self.output_dir.join(&header.file_name);

        let mut file = if header.status == STATUS_NEW {
            OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&path)?
        } else {
            OpenOptions::new().append(true).create(true).open(&path)?
        };

        let data = &message[FILE_HEADER_LEN..];
        file.write_all(data)?;
        debug!(
            peer = %self.peer,
            file = %header.file_name,
            bytes = data.len(),
            status = header.status,
            "wrote chunk"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::STATUS_APPEND;
    use std::sync::Arc;
    use std::thread;
    use tempfile::tempdir;

    fn message(name: &str, status: i32, data: &[u8]) -> Bytes {
        let mut buf = vec![0u8; FILE_HEADER_LEN + data.len()];
        FileHeader::new(name, status).encode(&mut buf).unwrap();
        buf[FILE_HEADER_LEN..].copy_from_slice(data);
        Bytes::from(buf)
    }

    #[test]
    fn test_new_then_append() {
        let dir = tempdir().unwrap();
        let writer = Arc::new(FileWriter::new("peer", dir.path()));

        let task = Arc::clone(&writer);
        let handle = thread::spawn(move || task.serve());

        writer.push(message("out.bin", STATUS_NEW, b"hello ")).unwrap();
        writer.push(message("out.bin", STATUS_APPEND, b"world")).unwrap();
        writer.close_channel();
        handle.join().unwrap();

        assert!(writer.is_finished());
        let contents = std::fs::read(dir.path().join("out.bin")).unwrap();
        assert_eq!(contents, b"hello world");
    }

    #[test]
    fn test_new_truncates_existing_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.bin");
        std::fs::write(&path, b"stale contents").unwrap();

        let writer = FileWriter::new("peer", dir.path());
        writer.push(message("out.bin", STATUS_NEW, b"fresh")).unwrap();
        writer.close_channel();
        writer.serve();

        assert_eq!(std::fs::read(&path).unwrap(), b"fresh");
    }

    #[test]
    fn test_short_message_is_skipped() {
        let dir = tempdir().unwrap();
        let writer = FileWriter::new("peer", dir.path());

        writer.push(Bytes::from_static(b"way too short")).unwrap();
        writer.push(message("ok.bin", STATUS_NEW, b"data")).unwrap();
        writer.close_channel();
        writer.serve();

        assert!(writer.is_finished());
        assert_eq!(std::fs::read(dir.path().join("ok.bin")).unwrap(), b"data");
    }

    #[test]
    fn test_open_failure_ends_task() {
        let dir = tempdir().unwrap();
        let writer = FileWriter::new("peer", &dir.path().join("missing-subdir"));

        writer.push(message("out.bin", STATUS_NEW, b"data")).unwrap();
        writer.push(message("out.bin", STATUS_APPEND, b"more")).unwrap();
        writer.close_channel();
        // Must terminate despite the unwritable target.
        writer.serve();
        assert!(writer.is_finished());
    }
}
