//! Receiver: demultiplexes datagrams from many peers onto per-peer writers.
//!
//! The dispatcher owns the socket and the peer map and runs on one thread;
//! writers run on the work-stealing pool. One iteration receives a single
//! datagram, acknowledges it, and either opens a stream (CONNECT), closes
//! one (CLOSE), or hands the payload to the peer's writer through its
//! bounded channel. The acknowledgement always goes out before the payload
//! is dispatched, so it promises acceptance into the pipeline, not a
//! durable write.

mod writer;

pub use writer::FileWriter;

use crate::config::ServerConfig;
use crate::connection::{Connection, MAX_DGRAM_SZ};
use crate::error::{TransferError, ERROR_PROTOCOL};
use crate::frame::{
    self, FrameKind, Pdu, CLOSE, CLOSEACK, CNTACK, ERROR, PDU_LEN, SENDFRAGMENTACK, SND, SNDACK,
};
use crate::executor::ThreadPool;
use bytes::Bytes;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// The receiver's dispatch loop and per-peer state.
///
/// Owns the connection endpoint, the peer-key → writer map, and the task
/// pool. Only the dispatcher thread touches the map; writers signal
/// completion through their finished flag and are reaped at the top of the
/// next iteration.
pub struct Server {
    conn: Connection,
    pool: ThreadPool,
    writers: HashMap<String, Arc<FileWriter>>,
    output_dir: PathBuf,
    scratch: [u8; MAX_DGRAM_SZ],
}

impl Server {
    /// Bind the receiver socket and prepare the output directory.
    pub fn new(config: &ServerConfig) -> Result<Self, TransferError> {
        let bind_addr: SocketAddr = format!("{}:{}", config.address, config.port)
            .parse()
            .map_err(|e| TransferError::NetworkError(format!("Invalid bind address: {}", e)))?;

        let output_dir = PathBuf::from(&config.output_directory);
        std::fs::create_dir_all(&output_dir)?;

        let conn = Connection::bind(bind_addr)?;
        let pool = match config.workers {
            Some(count) => ThreadPool::with_workers(count),
            None => ThreadPool::new(),
        };

        info!(
            addr = %conn.local_addr()?,
            workers = pool.worker_count(),
            output_dir = %output_dir.display(),
            "receiver started, waiting for transfers"
        );

        Ok(Self {
            conn,
            pool,
            writers: HashMap::new(),
            output_dir,
            scratch: [0u8; MAX_DGRAM_SZ],
        })
    }

    /// Address the receiver is listening on.
    pub fn local_addr(&self) -> Result<SocketAddr, TransferError> {
        self.conn.local_addr()
    }

    /// Peers whose writer task is still running.
    pub fn active_peers(&self) -> Vec<String> {
        self.writers
            .values()
            .filter(|w| !w.is_finished())
            .map(|w| w.peer().to_string())
            .collect()
    }

    /// Serve forever; individual dispatch failures are logged and do not
    /// stop the loop.
    pub fn run(&mut self) -> Result<(), TransferError> {
        loop {
            if let Err(e) = self.listen() {
                error!(error = %e, "dispatch iteration failed");
            }
        }
    }

    /// One dispatch iteration: receive one datagram, acknowledge it, route
    /// its payload.
    pub fn listen(&mut self) -> Result<(), TransferError> {
        self.reap_finished();

        self.scratch.fill(0);
        let (received, src) = self.conn.recv_raw(&mut self.scratch)?;
        let peer_key = src.to_string();

        let mut failure = None;
        let mut pdu = Pdu::control(frame::INI, 0);
        if received < PDU_LEN {
            failure = Some(TransferError::BadDatagram);
        } else {
            pdu = Pdu::decode(&self.scratch[..received])?;
            if pdu.dgram_sz as usize > self.scratch.len() {
                failure = Some(TransferError::BufferUndersized {
                    declared: pdu.dgram_sz,
                    capacity: self.scratch.len(),
                });
            }
        }

        // CLOSE is also header-sized, so the connect path keys on the
        // decoded message type, not on size alone.
        if failure.is_none() && received == PDU_LEN && pdu.kind() == FrameKind::Connect {
            return self.accept_peer(&peer_key, &pdu);
        }

        let dgram_sz = if failure.is_some() { 0 } else { pdu.dgram_sz };
        let seq = self.conn.advance_peer_seq(&peer_key, dgram_sz);
        let mut reply = Pdu::control(ERROR, seq);

        if let Some(err) = failure {
            reply.err_num = err.wire_code();
            self.send_reply(&reply)?;
            warn!(peer = %peer_key, error = %err, "rejected malformed datagram");
            return Ok(());
        }

        let mut valid = true;
        if pdu.is_fragment() {
            reply.mtype = SENDFRAGMENTACK;
        } else {
            match pdu.mtype {
                SND => reply.mtype = SNDACK,
                CLOSE => reply.mtype = CLOSEACK,
                other => {
                    warn!(peer = %peer_key, mtype = other, "unexpected or bad mtype in header");
                    reply.err_num = ERROR_PROTOCOL;
                    valid = false;
                }
            }
        }

        // Acknowledge before any payload dispatch.
        self.send_reply(&reply)?;
        if !valid {
            return Ok(());
        }

        let writer = match self.writers.get(&peer_key) {
            Some(writer) => Arc::clone(writer),
            None => {
                warn!(peer = %peer_key, "frame from peer without a stream, dropping");
                return Ok(());
            }
        };

        if pdu.mtype == CLOSE {
            info!(peer = %peer_key, "stream closing");
            writer.close_channel();
        } else {
            let payload = Bytes::copy_from_slice(&self.scratch[PDU_LEN..received]);
            if writer.push(payload).is_err() {
                warn!(peer = %peer_key, "writer channel closed, dropping payload");
            }
        }

        Ok(())
    }

    /// Open a stream for a connecting peer: acknowledge, seed the sequence
    /// table, create the writer, and hand its loop to the executor.
    fn accept_peer(&mut self, peer_key: &str, pdu: &Pdu) -> Result<(), TransferError> {
        let seq = pdu.seqnum.wrapping_add(1);
        self.send_reply(&Pdu::control(CNTACK, seq))?;
        self.conn.set_peer_seq(peer_key, seq);

        if let Some(existing) = self.writers.get(peer_key) {
            if !existing.is_finished() {
                debug!(peer = %peer_key, "duplicate CONNECT from active peer, re-acknowledged");
                return Ok(());
            }
        }

        let writer = Arc::new(FileWriter::new(peer_key, &self.output_dir));
        self.writers.insert(peer_key.to_string(), Arc::clone(&writer));

        let task = Arc::clone(&writer);
        self.pool.submit(move || task.serve())?;

        info!(peer = %peer_key, "connection established");
        Ok(())
    }

    fn send_reply(&self, pdu: &Pdu) -> Result<(), TransferError> {
        let mut buf = [0u8; PDU_LEN];
        pdu.encode(&mut buf)?;
        let sent = self.conn.send_raw(&buf)?;
        if sent != PDU_LEN {
            return Err(TransferError::Protocol(format!(
                "sent {} bytes of a {}-byte response frame",
                sent, PDU_LEN
            )));
        }
        Ok(())
    }

    /// Remove map entries whose writer task has exited. Runs on the
    /// dispatcher thread only.
    fn reap_finished(&mut self) {
        let finished: Vec<String> = self
            .writers
            .iter()
            .filter(|(_, writer)| writer.is_finished())
            .map(|(key, _)| key.clone())
            .collect();
        for key in finished {
            self.writers.remove(&key);
            self.conn.forget_peer(&key);
            debug!(peer = %key, "reaped finished writer");
        }
    }

    /// Set a receive timeout on the underlying socket.
    pub fn set_read_timeout(&self, timeout: Option<std::time::Duration>) -> Result<(), TransferError> {
        self.conn.set_read_timeout(timeout)
    }
}
