//! Wire format for the transfer protocol.
//!
//! Every datagram starts with a fixed 20-byte `Pdu` header; data-carrying
//! frames follow it with a 112-byte `FileHeader` naming the output file.
//! Both headers are serialized explicitly as packed little-endian fields,
//! never by in-memory layout, so the format is stable across peers.

use crate::error::TransferError;

/// Encoded size of the transport header.
pub const PDU_LEN: usize = 20;
/// Encoded size of the application file header.
pub const FILE_HEADER_LEN: usize = 112;
/// Width of the NUL-terminated file name field.
pub const FILE_NAME_LEN: usize = 100;

/// Wire protocol version carried in both headers.
pub const PROTO_VERSION: u32 = 1;

// Message type bitfield. Composites are the bitwise OR of primitives and are
// what actually travels on the wire.
pub const INI: i32 = 0;
pub const ACK: i32 = 1;
pub const SND: i32 = 2;
pub const CONNECT: i32 = 4;
pub const CLOSE: i32 = 8;
pub const NACK: i32 = 16;
pub const FRAGMENT: i32 = 32;
pub const ERROR: i32 = 64;

pub const SNDACK: i32 = SND | ACK;
pub const CNTACK: i32 = CONNECT | ACK;
pub const CLOSEACK: i32 = CLOSE | ACK;
pub const SENDFRAGMENT: i32 = FRAGMENT | SND;
pub const SENDFRAGMENTACK: i32 = FRAGMENT | SNDACK;

// File header status values.
pub const STATUS_NEW: i32 = 0;
pub const STATUS_APPEND: i32 = 1;

// File header error values.
pub const FILE_ERR_ACCESS_DENIED: i32 = -2;
pub const FILE_ERR_NOT_FOUND: i32 = -1;
pub const FILE_ERR_NONE: i32 = 0;
pub const FILE_ERR_UNKNOWN: i32 = 99;

/// Classification of a frame's `mtype` bitfield.
///
/// The wire keeps the OR-of-primitives encoding; everything past the codec
/// works with this tagged view instead of re-testing bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// Connection request from a new peer.
    Connect,
    /// Data frame (`SND`).
    Data,
    /// Data frame with more payload to follow (`SENDFRAGMENT`).
    Fragment,
    /// Stream termination request.
    Close,
    /// Error report from the peer.
    Error,
    /// Any `*ACK` composite.
    Ack,
    /// Anything else, including `INI` and `NACK`.
    Other,
}

/// Classify a raw `mtype` value.
pub fn classify(mtype: i32) -> FrameKind {
    if mtype & ERROR != 0 {
        return FrameKind::Error;
    }
    if mtype & ACK != 0 {
        return FrameKind::Ack;
    }
    if mtype & FRAGMENT != 0 {
        return FrameKind::Fragment;
    }
    match mtype {
        CONNECT => FrameKind::Connect,
        SND => FrameKind::Data,
        CLOSE => FrameKind::Close,
        _ => FrameKind::Other,
    }
}

/// Human-readable name of an `mtype` value, for log output.
pub fn describe(mtype: i32) -> &'static str {
    match mtype {
        ACK => "ACK",
        SND => "SEND",
        CONNECT => "CONNECT",
        CLOSE => "CLOSE",
        NACK => "NACK",
        ERROR => "ERROR",
        SNDACK => "SEND/ACK",
        CNTACK => "CONNECT/ACK",
        CLOSEACK => "CLOSE/ACK",
        SENDFRAGMENT => "SEND FRAGMENT",
        SENDFRAGMENTACK => "SEND FRAGMENT/ACK",
        _ => "***UNKNOWN***",
    }
}

/// Transport header prepended to every datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pdu {
    pub proto_ver: u32,
    pub mtype: i32,
    pub seqnum: u32,
    pub dgram_sz: i32,
    pub err_num: i32,
}

impl Pdu {
    /// A control frame (no payload, no error) of the given type.
    pub fn control(mtype: i32, seqnum: u32) -> Self {
        Self {
            proto_ver: PROTO_VERSION,
            mtype,
            seqnum,
            dgram_sz: 0,
            err_num: 0,
        }
    }

    /// Write the header into the first `PDU_LEN` bytes of `buf`.
    ///
    /// The destination must hold at least `PDU_LEN` bytes; nothing is
    /// allocated and exactly `PDU_LEN` bytes are written.
    pub fn encode(&self, buf: &mut [u8]) -> Result<usize, TransferError> {
        if buf.len() < PDU_LEN {
            return Err(TransferError::BufferUndersized {
                declared: PDU_LEN as i32,
                capacity: buf.len(),
            });
        }
        buf[0..4].copy_from_slice(&self.proto_ver.to_le_bytes());
        buf[4..8].copy_from_slice(&self.mtype.to_le_bytes());
        buf[8..12].copy_from_slice(&self.seqnum.to_le_bytes());
        buf[12..16].copy_from_slice(&self.dgram_sz.to_le_bytes());
        buf[16..20].copy_from_slice(&self.err_num.to_le_bytes());
        Ok(PDU_LEN)
    }

    /// Read a header from the first `PDU_LEN` bytes of `buf`.
    pub fn decode(buf: &[u8]) -> Result<Self, TransferError> {
        if buf.len() < PDU_LEN {
            return Err(TransferError::BadDatagram);
        }
        Ok(Self {
            proto_ver: u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]),
            mtype: i32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]),
            seqnum: u32::from_le_bytes([buf[8], buf[9], buf[10], buf[11]]),
            dgram_sz: i32::from_le_bytes([buf[12], buf[13], buf[14], buf[15]]),
            err_num: i32::from_le_bytes([buf[16], buf[17], buf[18], buf[19]]),
        })
    }

    /// Whether the FRAGMENT bit is set.
    pub fn is_fragment(&self) -> bool {
        self.mtype & FRAGMENT != 0
    }

    /// Tagged view of the message type.
    pub fn kind(&self) -> FrameKind {
        classify(self.mtype)
    }
}

/// Application header carried at the front of every data payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHeader {
    /// Receiver-side output file name. At most `FILE_NAME_LEN - 1` bytes.
    pub file_name: String,
    pub proto_ver: u32,
    /// `STATUS_NEW` truncates, `STATUS_APPEND` appends.
    pub status: i32,
    pub err: i32,
}

impl FileHeader {
    pub fn new(file_name: &str, status: i32) -> Self {
        Self {
            file_name: file_name.to_string(),
            proto_ver: PROTO_VERSION,
            status,
            err: FILE_ERR_NONE,
        }
    }

    /// Write the header into the first `FILE_HEADER_LEN` bytes of `buf`.
    ///
    /// The name is NUL-padded to `FILE_NAME_LEN` bytes and truncated if it
    /// does not fit with its terminator.
    pub fn encode(&self, buf: &mut [u8]) -> Result<usize, TransferError> {
        if buf.len() < FILE_HEADER_LEN {
            return Err(TransferError::BufferUndersized {
                declared: FILE_HEADER_LEN as i32,
                capacity: buf.len(),
            });
        }
        let name = self.file_name.as_bytes();
        let n = name.len().min(FILE_NAME_LEN - 1);
        buf[..n].copy_from_slice(&name[..n]);
        buf[n..FILE_NAME_LEN].fill(0);
        buf[100..104].copy_from_slice(&self.proto_ver.to_le_bytes());
        buf[104..108].copy_from_slice(&self.status.to_le_bytes());
        buf[108..112].copy_from_slice(&self.err.to_le_bytes());
        Ok(FILE_HEADER_LEN)
    }

    /// Read a header from the first `FILE_HEADER_LEN` bytes of `buf`.
    pub fn decode(buf: &[u8]) -> Result<Self, TransferError> {
        if buf.len() < FILE_HEADER_LEN {
            return Err(TransferError::BadDatagram);
        }
        let name_end = buf[..FILE_NAME_LEN]
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(FILE_NAME_LEN);
        let file_name = String::from_utf8_lossy(&buf[..name_end]).into_owned();
        Ok(Self {
            file_name,
            proto_ver: u32::from_le_bytes([buf[100], buf[101], buf[102], buf[103]]),
            status: i32::from_le_bytes([buf[104], buf[105], buf[106], buf[107]]),
            err: i32::from_le_bytes([buf[108], buf[109], buf[110], buf[111]]),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_composite_values() {
        assert_eq!(SNDACK, 3);
        assert_eq!(CNTACK, 5);
        assert_eq!(CLOSEACK, 9);
        assert_eq!(SENDFRAGMENT, 34);
        assert_eq!(SENDFRAGMENTACK, 35);
    }

    #[test]
    fn test_pdu_round_trip() {
        let pdu = Pdu {
            proto_ver: PROTO_VERSION,
            mtype: SENDFRAGMENT,
            seqnum: 0xDEAD_BEEF,
            dgram_sz: 612,
            err_num: -4,
        };
        let mut buf = [0u8; PDU_LEN];
        assert_eq!(pdu.encode(&mut buf).unwrap(), PDU_LEN);
        assert_eq!(Pdu::decode(&buf).unwrap(), pdu);
    }

    #[test]
    fn test_pdu_layout_is_little_endian() {
        let pdu = Pdu::control(CONNECT, 1);
        let mut buf = [0u8; PDU_LEN];
        pdu.encode(&mut buf).unwrap();
        assert_eq!(&buf[0..4], &[1, 0, 0, 0]);
        assert_eq!(&buf[4..8], &[4, 0, 0, 0]);
        assert_eq!(&buf[8..12], &[1, 0, 0, 0]);
    }

    #[test]
    fn test_pdu_decode_rejects_short_buffer() {
        let buf = [0u8; PDU_LEN - 1];
        match Pdu::decode(&buf) {
            Err(TransferError::BadDatagram) => {}
            other => panic!("expected BadDatagram, got {:?}", other),
        }
    }

    #[test]
    fn test_pdu_encode_rejects_small_destination() {
        let pdu = Pdu::control(ACK, 0);
        let mut buf = [0u8; 8];
        match pdu.encode(&mut buf) {
            Err(TransferError::BufferUndersized { .. }) => {}
            other => panic!("expected BufferUndersized, got {:?}", other),
        }
    }

    #[test]
    fn test_classify() {
        assert_eq!(classify(CONNECT), FrameKind::Connect);
        assert_eq!(classify(SND), FrameKind::Data);
        assert_eq!(classify(SENDFRAGMENT), FrameKind::Fragment);
        assert_eq!(classify(CLOSE), FrameKind::Close);
        assert_eq!(classify(ERROR), FrameKind::Error);
        assert_eq!(classify(SNDACK), FrameKind::Ack);
        assert_eq!(classify(CNTACK), FrameKind::Ack);
        assert_eq!(classify(CLOSEACK), FrameKind::Ack);
        assert_eq!(classify(SENDFRAGMENTACK), FrameKind::Ack);
        assert_eq!(classify(NACK), FrameKind::Other);
        assert_eq!(classify(INI), FrameKind::Other);
    }

    #[test]
    fn test_fragment_bit() {
        assert!(Pdu::control(SENDFRAGMENT, 0).is_fragment());
        assert!(Pdu::control(SENDFRAGMENTACK, 0).is_fragment());
        assert!(!Pdu::control(SND, 0).is_fragment());
    }

    #[test]
    fn test_describe() {
        assert_eq!(describe(SNDACK), "SEND/ACK");
        assert_eq!(describe(SENDFRAGMENTACK), "SEND FRAGMENT/ACK");
        assert_eq!(describe(1234), "***UNKNOWN***");
    }

    #[test]
    fn test_file_header_round_trip() {
        let hdr = FileHeader::new("hello.txt", STATUS_NEW);
        let mut buf = [0u8; FILE_HEADER_LEN];
        assert_eq!(hdr.encode(&mut buf).unwrap(), FILE_HEADER_LEN);
        let parsed = FileHeader::decode(&buf).unwrap();
        assert_eq!(parsed.file_name, "hello.txt");
        assert_eq!(parsed.proto_ver, PROTO_VERSION);
        assert_eq!(parsed.status, STATUS_NEW);
        assert_eq!(parsed.err, FILE_ERR_NONE);
    }

    #[test]
    fn test_file_header_truncates_long_name() {
        let long = "x".repeat(200);
        let hdr = FileHeader::new(&long, STATUS_APPEND);
        let mut buf = [0u8; FILE_HEADER_LEN];
        hdr.encode(&mut buf).unwrap();
        let parsed = FileHeader::decode(&buf).unwrap();
        assert_eq!(parsed.file_name.len(), FILE_NAME_LEN - 1);
        // Terminator survives.
        assert_eq!(buf[FILE_NAME_LEN - 1], 0);
    }

    #[test]
    fn test_file_header_decode_rejects_short_buffer() {
        let buf = [0u8; FILE_HEADER_LEN - 1];
        assert!(FileHeader::decode(&buf).is_err());
    }
}
