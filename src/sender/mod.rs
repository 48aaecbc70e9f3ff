//! Sender implementation for client-side file transfers.
//!
//! The sender is single-threaded: it performs the connect handshake, streams
//! the file in fixed-size chunks each prefixed by a file header (the first
//! marked `NEW`, the rest `APPEND`), and closes the stream. Reliability is
//! the lock-step acknowledgement inside `Connection::send`; there is no
//! retransmission.

use crate::config::ClientConfig;
use crate::connection::{Connection, MAX_BUFF_SZ};
use crate::error::TransferError;
use crate::frame::{FileHeader, FILE_HEADER_LEN, STATUS_APPEND, STATUS_NEW};
use indicatif::{ProgressBar, ProgressStyle};
use std::fs::File;
use std::io::Read;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use tracing::info;

/// File bytes carried per datagram alongside the file header.
pub const CHUNK_SZ: usize = MAX_BUFF_SZ - FILE_HEADER_LEN;

/// Client-side transfer of one file to the receiver.
pub struct Sender {
    conn: Connection,
    file_path: PathBuf,
    show_progress: bool,
}

impl Sender {
    /// Resolve the server address and bind the local endpoint.
    pub fn new(file_path: &Path, config: &ClientConfig) -> Result<Self, TransferError> {
        if !file_path.is_file() {
            return Err(TransferError::FileNotFound(file_path.to_path_buf()));
        }
        let server: SocketAddr = format!("{}:{}", config.server_address, config.server_port)
            .parse()
            .map_err(|e| TransferError::NetworkError(format!("Invalid server address: {}", e)))?;
        let conn = Connection::connect_to(server)?;
        Ok(Self {
            conn,
            file_path: file_path.to_path_buf(),
            show_progress: config.progress_bar_enabled,
        })
    }

    /// Transfer the whole file and close the stream.
    ///
    /// Returns the number of file bytes transmitted.
    pub fn run(&mut self) -> Result<u64, TransferError> {
        self.conn.connect()?;

        let mut file = File::open(&self.file_path)?;
        let file_size = file.metadata()?.len();
        let file_name = self
            .file_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("unknown")
            .to_string();

        info!(file = %file_name, size = file_size, "starting transfer");
        let progress = self.make_progress(file_size, &file_name);

        let mut payload = [0u8; MAX_BUFF_SZ];
        let mut status = STATUS_NEW;
        let mut total = 0u64;

        loop {
            let read = file.read(&mut payload[FILE_HEADER_LEN..])?;
            if read == 0 && !(total == 0 && status == STATUS_NEW) {
                break;
            }
            // An empty file still travels as one header-only NEW frame so
            // the receiver materializes it.
            FileHeader::new(&file_name, status).encode(&mut payload)?;
            self.conn.send(&payload[..FILE_HEADER_LEN + read])?;

            status = STATUS_APPEND;
            total += read as u64;
            if let Some(ref pb) = progress {
                pb.set_position(total);
            }
            if read == 0 {
                break;
            }
        }

        if let Some(ref pb) = progress {
            pb.finish_with_message(file_name.clone());
        }

        self.conn.disconnect()?;
        info!(file = %file_name, bytes = total, "transfer complete");
        Ok(total)
    }

    fn make_progress(&self, file_size: u64, file_name: &str) -> Option<ProgressBar> {
        if !self.show_progress {
            return None;
        }
        let pb = ProgressBar::new(file_size);
        pb.set_style(
            ProgressStyle::default_bar()
                .template(
                    "{msg:25.25} {bytes:>10}/{total_bytes:>10} {percent:>5}% {bytes_per_sec:>12} {eta:>8}",
                )
                .unwrap()
                .progress_chars("█▉▊▋▌▍▎▏ "),
        );
        pb.set_message(file_name.to_string());
        Some(pb)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_size_fills_one_frame() {
        assert_eq!(CHUNK_SZ, 500);
        assert_eq!(FILE_HEADER_LEN + CHUNK_SZ, MAX_BUFF_SZ);
    }

    #[test]
    fn test_missing_file_is_rejected() {
        let config = ClientConfig::default();
        match Sender::new(Path::new("/definitely/not/here.bin"), &config) {
            Err(TransferError::FileNotFound(_)) => {}
            other => panic!("expected FileNotFound, got {:?}", other.map(|_| ())),
        }
    }
}
