// Licensed under the Apache-2.0 license

//! IPMB frame layout.
//!
//! ```text
//! request : rsSA | netFn/rsLUN | chk1 | rqSA | rqSeq/rqLUN | cmd |        data.. | chk2
//! response: rqSA | netFn/rqLUN | chk1 | rsSA | rqSeq/rsLUN | cmd | cc |   data.. | chk2
//! ```
//!
//! A response has an odd network function. Bit fields are packed with
//! explicit shifts and masks over byte-sized header structs.

use core::fmt;

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::i2c::common::{Frame, I2cError, MAX_MSG_LEN};

pub const IPMB_REQ_HEADER_LENGTH: usize = 6;
pub const IPMB_RESP_HEADER_LENGTH: usize = 7;
pub const IPMI_MSG_MAX_LENGTH: usize = MAX_MSG_LEN;

/// Address of the shelf manager (MCH) on IPMB-L.
pub const MCH_ADDRESS: u8 = 0x20;

const NETFN_SHIFT: u8 = 2;
const SEQ_SHIFT: u8 = 2;
const LUN_MASK: u8 = 0x03;
/// Sequence numbers occupy six bits.
pub const SEQ_MASK: u8 = 0x3F;

/// Payload carried by one message.
pub type Payload = heapless::Vec<u8, IPMI_MSG_MAX_LENGTH>;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum IpmbError {
    /// The underlying bus transfer failed.
    Bus(I2cError),
    /// Fewer bytes than a header plus checksum.
    Truncated,
    HeaderChecksum,
    MessageChecksum,
    /// The encoded message would not fit one frame.
    TooLong,
}

impl From<I2cError> for IpmbError {
    fn from(err: I2cError) -> Self {
        IpmbError::Bus(err)
    }
}

impl fmt::Display for IpmbError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IpmbError::Bus(err) => write!(f, "bus error: {err}"),
            IpmbError::Truncated => f.write_str("truncated message"),
            IpmbError::HeaderChecksum => f.write_str("bad header checksum"),
            IpmbError::MessageChecksum => f.write_str("bad message checksum"),
            IpmbError::TooLong => f.write_str("message too long"),
        }
    }
}

/// Two's complement of the byte sum.
#[must_use]
pub fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |acc, &b| acc.wrapping_sub(b))
}

/// Responder address, network function and checksum.
#[derive(FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned, Copy, Clone, Debug)]
#[repr(C)]
pub struct ConnectionHeader {
    dest_addr: u8,
    netfn_lun: u8,
    checksum: u8,
}

impl ConnectionHeader {
    #[must_use]
    pub fn new(dest_addr: u8, netfn: u8, lun: u8) -> Self {
        let netfn_lun = (netfn << NETFN_SHIFT) | (lun & LUN_MASK);
        Self {
            dest_addr,
            netfn_lun,
            checksum: checksum(&[dest_addr, netfn_lun]),
        }
    }

    #[must_use]
    pub fn dest_addr(&self) -> u8 {
        self.dest_addr
    }

    #[must_use]
    pub fn netfn(&self) -> u8 {
        self.netfn_lun >> NETFN_SHIFT
    }

    #[must_use]
    pub fn lun(&self) -> u8 {
        self.netfn_lun & LUN_MASK
    }

    #[must_use]
    pub fn checksum_valid(&self) -> bool {
        checksum(&[self.dest_addr, self.netfn_lun]) == self.checksum
    }
}

/// Source address, sequence number and command.
#[derive(FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned, Copy, Clone, Debug)]
#[repr(C)]
pub struct RequesterHeader {
    src_addr: u8,
    seq_lun: u8,
    cmd: u8,
}

impl RequesterHeader {
    #[must_use]
    pub fn new(src_addr: u8, seq: u8, lun: u8, cmd: u8) -> Self {
        Self {
            src_addr,
            seq_lun: ((seq & SEQ_MASK) << SEQ_SHIFT) | (lun & LUN_MASK),
            cmd,
        }
    }

    #[must_use]
    pub fn src_addr(&self) -> u8 {
        self.src_addr
    }

    #[must_use]
    pub fn seq(&self) -> u8 {
        self.seq_lun >> SEQ_SHIFT
    }

    #[must_use]
    pub fn lun(&self) -> u8 {
        self.seq_lun & LUN_MASK
    }

    #[must_use]
    pub fn cmd(&self) -> u8 {
        self.cmd
    }
}

/// Decoded IPMI message.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct IpmiMessage {
    pub dest_addr: u8,
    pub netfn: u8,
    pub dest_lun: u8,
    pub src_addr: u8,
    pub seq: u8,
    pub src_lun: u8,
    pub cmd: u8,
    /// Only meaningful for responses.
    pub completion_code: u8,
    pub data: Payload,
}

impl IpmiMessage {
    /// Request to `dest_addr`; source address and sequence are stamped when
    /// it is sent.
    ///
    /// # Errors
    ///
    /// Returns [`IpmbError::TooLong`] if `data` cannot fit a request frame.
    pub fn request(dest_addr: u8, netfn: u8, cmd: u8, data: &[u8]) -> Result<Self, IpmbError> {
        if data.len() > IPMI_MSG_MAX_LENGTH - IPMB_REQ_HEADER_LENGTH - 1 {
            return Err(IpmbError::TooLong);
        }
        Ok(Self {
            dest_addr,
            netfn: netfn & !1,
            cmd,
            data: Payload::from_slice(data).map_err(|()| IpmbError::TooLong)?,
            ..Self::default()
        })
    }

    /// Response to `self`: network function plus one, addresses and LUNs
    /// swapped, same sequence number and command.
    ///
    /// # Errors
    ///
    /// Returns [`IpmbError::TooLong`] if `data` cannot fit a response frame.
    pub fn response(&self, completion_code: u8, data: &[u8]) -> Result<Self, IpmbError> {
        if data.len() > IPMI_MSG_MAX_LENGTH - IPMB_RESP_HEADER_LENGTH - 1 {
            return Err(IpmbError::TooLong);
        }
        Ok(Self {
            dest_addr: self.src_addr,
            netfn: self.netfn.wrapping_add(1),
            dest_lun: self.src_lun,
            src_addr: self.dest_addr,
            seq: self.seq,
            src_lun: self.dest_lun,
            cmd: self.cmd,
            completion_code,
            data: Payload::from_slice(data).map_err(|()| IpmbError::TooLong)?,
        })
    }

    #[must_use]
    pub fn is_response(&self) -> bool {
        self.netfn & 1 == 1
    }

    fn header_len(&self) -> usize {
        if self.is_response() {
            IPMB_RESP_HEADER_LENGTH
        } else {
            IPMB_REQ_HEADER_LENGTH
        }
    }

    /// Serialise into a wire frame, destination address included.
    ///
    /// # Errors
    ///
    /// Returns [`IpmbError::TooLong`] if the frame would exceed
    /// [`IPMI_MSG_MAX_LENGTH`].
    pub fn encode(&self) -> Result<Frame, IpmbError> {
        if self.header_len() + self.data.len() + 1 > IPMI_MSG_MAX_LENGTH {
            return Err(IpmbError::TooLong);
        }
        let connection = ConnectionHeader::new(self.dest_addr, self.netfn, self.dest_lun);
        let requester = RequesterHeader::new(self.src_addr, self.seq, self.src_lun, self.cmd);

        let mut frame = Frame::new();
        let push = |frame: &mut Frame, bytes: &[u8]| {
            frame
                .extend_from_slice(bytes)
                .map_err(|_| IpmbError::TooLong)
        };
        push(&mut frame, connection.as_bytes())?;
        push(&mut frame, requester.as_bytes())?;
        if self.is_response() {
            push(&mut frame, &[self.completion_code])?;
        }
        push(&mut frame, &self.data)?;
        let tail = frame.get(IPMB_CONNECTION_LEN..).unwrap_or_default();
        let chk = checksum(tail);
        push(&mut frame, &[chk])?;
        Ok(frame)
    }

    /// Parse and verify a wire frame, destination address included.
    ///
    /// # Errors
    ///
    /// * [`IpmbError::Truncated`] if `bytes` is shorter than a header plus
    ///   checksum
    /// * [`IpmbError::HeaderChecksum`] or [`IpmbError::MessageChecksum`] on a
    ///   checksum mismatch
    /// * [`IpmbError::TooLong`] if `bytes` exceeds [`IPMI_MSG_MAX_LENGTH`]
    pub fn decode(bytes: &[u8]) -> Result<Self, IpmbError> {
        if bytes.len() > IPMI_MSG_MAX_LENGTH {
            return Err(IpmbError::TooLong);
        }
        let (connection, rest) =
            ConnectionHeader::read_from_prefix(bytes).map_err(|_| IpmbError::Truncated)?;
        if !connection.checksum_valid() {
            return Err(IpmbError::HeaderChecksum);
        }
        let (requester, rest) =
            RequesterHeader::read_from_prefix(rest).map_err(|_| IpmbError::Truncated)?;

        let is_response = connection.netfn() & 1 == 1;
        let (completion_code, rest) = if is_response {
            match rest.split_first() {
                Some((&cc, rest)) => (cc, rest),
                None => return Err(IpmbError::Truncated),
            }
        } else {
            (0, rest)
        };
        let (&msg_chk, data) = rest.split_last().ok_or(IpmbError::Truncated)?;

        let body = bytes
            .get(IPMB_CONNECTION_LEN..bytes.len() - 1)
            .ok_or(IpmbError::Truncated)?;
        if checksum(body) != msg_chk {
            return Err(IpmbError::MessageChecksum);
        }

        Ok(Self {
            dest_addr: connection.dest_addr(),
            netfn: connection.netfn(),
            dest_lun: connection.lun(),
            src_addr: requester.src_addr(),
            seq: requester.seq(),
            src_lun: requester.lun(),
            cmd: requester.cmd(),
            completion_code,
            data: Payload::from_slice(data).map_err(|()| IpmbError::TooLong)?,
        })
    }
}

const IPMB_CONNECTION_LEN: usize = core::mem::size_of::<ConnectionHeader>();
