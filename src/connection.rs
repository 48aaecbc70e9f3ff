//! Blocking UDP endpoint implementing the framed request/response protocol.
//!
//! A `Connection` owns the socket, the current outbound peer (always the
//! source of the last received datagram, so replies go back where the data
//! came from), a wrapping 32-bit sequence counter, and on the receiver side
//! the per-peer sequence map keyed by the textual peer address.
//!
//! Every well-formed datagram is answered with exactly one response frame
//! before its payload moves further down the pipeline. The ACK means
//! "accepted into the pipeline", not "durably written".

use crate::error::TransferError;
use crate::frame::{
    self, FrameKind, Pdu, CLOSE, CLOSEACK, CNTACK, CONNECT, ERROR, FILE_HEADER_LEN, PDU_LEN,
    SENDFRAGMENT, SENDFRAGMENTACK, SND, SNDACK,
};
use std::collections::HashMap;
use std::net::{SocketAddr, UdpSocket};
#[cfg(target_os = "linux")]
use std::os::unix::io::AsRawFd;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Largest payload carried by a single datagram: one file header plus a
/// full 500-byte chunk of file data. Larger payloads travel as fragments.
pub const MAX_BUFF_SZ: usize = FILE_HEADER_LEN + 500;
/// Largest datagram on the wire, header included.
pub const MAX_DGRAM_SZ: usize = PDU_LEN + MAX_BUFF_SZ;

/// Configure UDP socket buffers for sustained transfer throughput.
fn configure_udp_socket(socket: &UdpSocket) -> Result<(), TransferError> {
    #[cfg(target_os = "linux")]
    {
        let fd = socket.as_raw_fd();
        let buf_size: libc::c_int = 4 * 1024 * 1024;
        unsafe {
            libc::setsockopt(
                fd,
                libc::SOL_SOCKET,
                libc::SO_SNDBUF,
                &buf_size as *const _ as *const libc::c_void,
                std::mem::size_of::<libc::c_int>() as libc::socklen_t,
            );
            libc::setsockopt(
                fd,
                libc::SOL_SOCKET,
                libc::SO_RCVBUF,
                &buf_size as *const _ as *const libc::c_void,
                std::mem::size_of::<libc::c_int>() as libc::socklen_t,
            );
        }
    }
    let _ = socket;
    Ok(())
}

/// A datagram endpoint for one side of a transfer.
pub struct Connection {
    socket: UdpSocket,
    peer: Option<SocketAddr>,
    seqnum: u32,
    connected: bool,
    peer_seqnums: HashMap<String, u32>,
    scratch: [u8; MAX_DGRAM_SZ],
}

impl Connection {
    /// Receiver side: bind to a local address and wait for peers.
    pub fn bind(addr: SocketAddr) -> Result<Self, TransferError> {
        let socket = UdpSocket::bind(addr)?;
        configure_udp_socket(&socket)?;
        Ok(Self {
            socket,
            peer: None,
            seqnum: 0,
            connected: false,
            peer_seqnums: HashMap::new(),
            scratch: [0u8; MAX_DGRAM_SZ],
        })
    }

    /// Sender side: bind an ephemeral port and aim at the server.
    pub fn connect_to(server: SocketAddr) -> Result<Self, TransferError> {
        let socket = UdpSocket::bind("0.0.0.0:0")?;
        configure_udp_socket(&socket)?;
        Ok(Self {
            socket,
            peer: Some(server),
            seqnum: 0,
            connected: false,
            peer_seqnums: HashMap::new(),
            scratch: [0u8; MAX_DGRAM_SZ],
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, TransferError> {
        Ok(self.socket.local_addr()?)
    }

    /// The current outbound peer, if any datagram has been exchanged.
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Current value of this endpoint's sequence counter.
    pub fn seqnum(&self) -> u32 {
        self.seqnum
    }

    /// Blocking-read timeout for the underlying socket.
    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> Result<(), TransferError> {
        Ok(self.socket.set_read_timeout(timeout)?)
    }

    /// Write `buf` as one datagram to the outbound peer.
    pub fn send_raw(&self, buf: &[u8]) -> Result<usize, TransferError> {
        let peer = self.peer.ok_or_else(|| {
            TransferError::Protocol("connection not set up: no outbound peer".to_string())
        })?;
        let sent = self.socket.send_to(buf, peer)?;
        if let Ok(pdu) = Pdu::decode(buf) {
            debug!(
                mtype = frame::describe(pdu.mtype),
                seqnum = pdu.seqnum,
                dgram_sz = pdu.dgram_sz,
                "frame out"
            );
        }
        Ok(sent)
    }

    /// Read one datagram, blocking. The source address becomes the new
    /// outbound target, so subsequent sends reply to this peer.
    pub fn recv_raw(&mut self, buf: &mut [u8]) -> Result<(usize, SocketAddr), TransferError> {
        let (received, src) = self.socket.recv_from(buf)?;
        self.peer = Some(src);
        if let Ok(pdu) = Pdu::decode(&buf[..received]) {
            debug!(
                mtype = frame::describe(pdu.mtype),
                seqnum = pdu.seqnum,
                dgram_sz = pdu.dgram_sz,
                %src,
                "frame in"
            );
        }
        Ok((received, src))
    }

    /// Frame and transmit one datagram of at most `MAX_BUFF_SZ` payload
    /// bytes, then wait for the lock-step acknowledgement.
    ///
    /// Returns the number of payload bytes transmitted.
    pub fn send_dgram(&mut self, payload: &[u8]) -> Result<usize, TransferError> {
        let dgram_sz = payload.len().min(MAX_BUFF_SZ);
        let mtype = if payload.len() > MAX_BUFF_SZ {
            SENDFRAGMENT
        } else {
            SND
        };
        let pdu = Pdu {
            proto_ver: frame::PROTO_VERSION,
            mtype,
            seqnum: self.seqnum,
            dgram_sz: dgram_sz as i32,
            err_num: 0,
        };
        let total = PDU_LEN + dgram_sz;
        pdu.encode(&mut self.scratch)?;
        self.scratch[PDU_LEN..total].copy_from_slice(&payload[..dgram_sz]);

        let sent = self.send_raw(&self.scratch[..total])?;
        if sent != total {
            warn!(sent, expected = total, "short datagram send");
        }

        self.seqnum = if dgram_sz == 0 {
            self.seqnum.wrapping_add(1)
        } else {
            self.seqnum.wrapping_add(dgram_sz as u32)
        };

        let mut ack = [0u8; PDU_LEN];
        let (received, _) = self.recv_raw(&mut ack)?;
        match Pdu::decode(&ack[..received]) {
            Ok(reply) if reply.kind() == FrameKind::Ack => {}
            Ok(reply) => warn!(
                mtype = frame::describe(reply.mtype),
                "expected SND/ACK but got a different mtype"
            ),
            Err(_) => warn!(received, "short acknowledgement frame"),
        }

        Ok(dgram_sz)
    }

    /// Transmit all of `buf`, chunking at `MAX_BUFF_SZ` per datagram.
    pub fn send(&mut self, buf: &[u8]) -> Result<usize, TransferError> {
        let mut remaining = buf;
        let mut total = 0;
        while !remaining.is_empty() {
            let sent = self.send_dgram(remaining)?;
            remaining = &remaining[sent..];
            total += sent;
        }
        Ok(total)
    }

    /// Receive one datagram into `buf`, validate it, advance the sequence
    /// counter, and transmit the matching response frame.
    ///
    /// Returns the total bytes received (header included). `CLOSE` frames
    /// are acknowledged and surface as `ConnectionClosed`.
    pub fn recv_dgram(&mut self, buf: &mut [u8]) -> Result<usize, TransferError> {
        if buf.len() > MAX_DGRAM_SZ {
            return Err(TransferError::BufferOversized {
                requested: buf.len(),
            });
        }

        let (received, _) = self.recv_raw(buf)?;

        let mut failure = None;
        let mut pdu = Pdu::control(frame::INI, 0);
        if received < PDU_LEN {
            failure = Some(TransferError::BadDatagram);
        } else {
            pdu = Pdu::decode(&buf[..received])?;
            if pdu.dgram_sz as usize > buf.len() {
                failure = Some(TransferError::BufferUndersized {
                    declared: pdu.dgram_sz,
                    capacity: buf.len(),
                });
            }
        }

        self.seqnum = if failure.is_some() || pdu.dgram_sz == 0 {
            self.seqnum.wrapping_add(1)
        } else {
            self.seqnum.wrapping_add(pdu.dgram_sz as u32)
        };

        let mut reply = Pdu::control(ERROR, self.seqnum);
        if let Some(err) = failure {
            reply.err_num = err.wire_code();
            self.reply_raw(&reply)?;
            return Err(err);
        }

        if pdu.is_fragment() {
            reply.mtype = SENDFRAGMENTACK;
            self.reply_raw(&reply)?;
            return Ok(received);
        }

        match pdu.mtype {
            SND => {
                reply.mtype = SNDACK;
                self.reply_raw(&reply)?;
                Ok(received)
            }
            CLOSE => {
                reply.mtype = CLOSEACK;
                self.reply_raw(&reply)?;
                self.connected = false;
                Err(TransferError::ConnectionClosed)
            }
            other => {
                warn!(
                    mtype = other,
                    "unexpected or bad mtype in header"
                );
                Err(TransferError::Protocol(format!(
                    "unexpected mtype {} ({})",
                    other,
                    frame::describe(other)
                )))
            }
        }
    }

    fn reply_raw(&self, pdu: &Pdu) -> Result<(), TransferError> {
        let mut out = [0u8; PDU_LEN];
        pdu.encode(&mut out)?;
        let sent = self.send_raw(&out)?;
        if sent != PDU_LEN {
            return Err(TransferError::Protocol(format!(
                "sent {} bytes of a {}-byte response frame",
                sent, PDU_LEN
            )));
        }
        Ok(())
    }

    /// Receive a complete message, concatenating fragment payloads until a
    /// frame without the FRAGMENT bit arrives.
    ///
    /// Returns the total payload bytes copied into `buf`.
    pub fn recv(&mut self, buf: &mut [u8]) -> Result<usize, TransferError> {
        let mut total = 0;
        loop {
            let mut dgram = [0u8; MAX_DGRAM_SZ];
            let received = self.recv_dgram(&mut dgram)?;
            let payload = &dgram[PDU_LEN..received];
            let copied = payload.len().min(buf.len() - total);
            buf[total..total + copied].copy_from_slice(&payload[..copied]);
            total += copied;

            let pdu = Pdu::decode(&dgram)?;
            if !pdu.is_fragment() {
                return Ok(total);
            }
        }
    }

    /// Sender-side handshake: transmit `CONNECT`, require `CNTACK`.
    pub fn connect(&mut self) -> Result<(), TransferError> {
        let pdu = Pdu::control(CONNECT, self.seqnum);
        self.reply_raw(&pdu)?;

        let mut buf = [0u8; PDU_LEN];
        let (received, _) = self.recv_raw(&mut buf)?;
        if received != PDU_LEN {
            return Err(TransferError::Protocol(format!(
                "connect: received {} bytes, expected {}",
                received, PDU_LEN
            )));
        }
        let ack = Pdu::decode(&buf)?;
        if ack.mtype != CNTACK {
            return Err(TransferError::Protocol(format!(
                "connect: expected CONNECT/ACK, got {}",
                frame::describe(ack.mtype)
            )));
        }

        self.seqnum = self.seqnum.wrapping_add(1);
        self.connected = true;
        info!("connection established");
        Ok(())
    }

    /// Single-peer accept: wait for a `CONNECT` frame and acknowledge it
    /// with `CNTACK` carrying the peer's sequence number plus one.
    pub fn listen(&mut self) -> Result<(), TransferError> {
        info!("waiting for a connection");
        let mut buf = [0u8; PDU_LEN];
        let (received, _) = self.recv_raw(&mut buf)?;
        if received != PDU_LEN {
            return Err(TransferError::Protocol(format!(
                "listen: received {} bytes, expected {}",
                received, PDU_LEN
            )));
        }
        let pdu = Pdu::decode(&buf)?;
        if pdu.kind() != FrameKind::Connect {
            return Err(TransferError::Protocol(format!(
                "listen: expected CONNECT, got {}",
                frame::describe(pdu.mtype)
            )));
        }

        self.seqnum = pdu.seqnum.wrapping_add(1);
        let ack = Pdu::control(CNTACK, self.seqnum);
        self.reply_raw(&ack)?;

        self.connected = true;
        info!("connection established");
        Ok(())
    }

    /// Clean shutdown: transmit `CLOSE`, require `CLOSEACK`.
    pub fn disconnect(&mut self) -> Result<(), TransferError> {
        let pdu = Pdu::control(CLOSE, self.seqnum);
        self.reply_raw(&pdu)?;

        let mut buf = [0u8; PDU_LEN];
        let (received, _) = self.recv_raw(&mut buf)?;
        if received != PDU_LEN {
            return Err(TransferError::Protocol(format!(
                "disconnect: received {} bytes, expected {}",
                received, PDU_LEN
            )));
        }
        let ack = Pdu::decode(&buf)?;
        if ack.mtype != CLOSEACK {
            return Err(TransferError::Protocol(format!(
                "disconnect: expected CLOSE/ACK, got {}",
                frame::describe(ack.mtype)
            )));
        }

        self.connected = false;
        Ok(())
    }

    /// Expected sequence number for a peer, if one is being tracked.
    pub fn peer_seq(&self, key: &str) -> Option<u32> {
        self.peer_seqnums.get(key).copied()
    }

    /// Record the expected sequence number for a peer.
    pub fn set_peer_seq(&mut self, key: &str, seq: u32) {
        self.peer_seqnums.insert(key.to_string(), seq);
    }

    /// Advance a peer's counter: by one for zero-sized frames, by the
    /// payload size otherwise. Returns the new value.
    pub fn advance_peer_seq(&mut self, key: &str, dgram_sz: i32) -> u32 {
        let seq = self.peer_seqnums.entry(key.to_string()).or_insert(0);
        *seq = if dgram_sz == 0 {
            seq.wrapping_add(1)
        } else {
            seq.wrapping_add(dgram_sz as u32)
        };
        *seq
    }

    /// Drop a peer's sequence-tracking entry.
    pub fn forget_peer(&mut self, key: &str) {
        self.peer_seqnums.remove(key);
    }
}
