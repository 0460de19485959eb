//! RMCP framing and the IPMI v1.5 LAN message format.
//!
//! Encode and decode are pure transforms between bytes and structures.
//! Checksums and the wrapper message length are always derived on the
//! encode path; decode reads them off the wire without validating so
//! callers decide when a bad checksum is a drop condition.

use crate::error::{Error, Result};

/// RMCP header values.
const RMCP_VERSION: u8 = 0x06;
const RMCP_RESERVED: u8 = 0x00;
const RMCP_SEQ_NO_ACK: u8 = 0xFF;
const RMCP_CLASS_IPMI: u8 = 0x07;

/// Session authentication type "none", the only type this server speaks.
pub const AUTH_NONE: u8 = 0x00;

/// Network Function (NetFn) codes, request (even) values.
pub mod netfn {
    /// Chassis requests.
    pub const CHASSIS: u8 = 0x00;
    /// Bridge requests.
    pub const BRIDGE: u8 = 0x02;
    /// Sensor/Event requests.
    pub const SENSOR_EVENT: u8 = 0x04;
    /// Application requests.
    pub const APP: u8 = 0x06;
    /// Firmware transfer requests.
    pub const FIRMWARE: u8 = 0x08;
    /// Storage requests.
    pub const STORAGE: u8 = 0x0A;
    /// Transport requests.
    pub const TRANSPORT: u8 = 0x0C;
    /// Group extension requests.
    pub const GROUP_EXTENSION: u8 = 0x2C;
    /// OEM group requests.
    pub const OEM_GROUP: u8 = 0x2E;

    /// A response NetFn is the request NetFn with this bit set.
    pub const RESPONSE: u8 = 0x01;
}

/// RMCP header size in bytes.
pub const RMCP_HEADER_LEN: usize = 4;
/// IPMI session wrapper size in bytes.
pub const SESSION_WRAPPER_LEN: usize = 10;
/// The six fixed IPMI message header bytes, through the command byte.
pub const MESSAGE_HEADER_LEN: usize = 6;
/// Trailing data checksum size in bytes.
pub const DATA_CHECKSUM_LEN: usize = 1;

/// Value of the wrapper `message_len` field for a message carrying
/// `data_len` payload bytes. The count runs from the target address
/// through the trailing data checksum; the completion code is present
/// in responses only. Shared by encode and decode so the fixed sizes
/// are defined in one place.
pub(crate) fn message_len(has_completion_code: bool, data_len: usize) -> usize {
    MESSAGE_HEADER_LEN + usize::from(has_completion_code) + data_len + DATA_CHECKSUM_LEN
}

/// The fixed 4-byte RMCP envelope in front of every IPMI datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RmcpHeader {
    /// RMCP version (0x06 for v1).
    pub version: u8,
    /// Reserved, 0x00.
    pub reserved: u8,
    /// RMCP sequence number; 0xFF means no ACK is requested.
    pub sequence: u8,
    /// Message class (0x07 for IPMI).
    pub class: u8,
}

impl RmcpHeader {
    /// The canonical header for an outbound IPMI response.
    pub fn ipmi() -> Self {
        Self {
            version: RMCP_VERSION,
            reserved: RMCP_RESERVED,
            sequence: RMCP_SEQ_NO_ACK,
            class: RMCP_CLASS_IPMI,
        }
    }

    /// Decode and sanity-check the header at the front of `bytes`.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < RMCP_HEADER_LEN {
            return Err(Error::Protocol("datagram shorter than RMCP header"));
        }
        if bytes[0] != RMCP_VERSION {
            return Err(Error::Protocol("unexpected RMCP version"));
        }
        if bytes[3] != RMCP_CLASS_IPMI {
            return Err(Error::Protocol("unexpected RMCP class"));
        }
        Ok(Self {
            version: bytes[0],
            reserved: bytes[1],
            sequence: bytes[2],
            class: bytes[3],
        })
    }

    /// Append the 4 header bytes to `out`.
    pub fn encode(&self, out: &mut Vec<u8>) {
        out.push(self.version);
        out.push(self.reserved);
        out.push(self.sequence);
        out.push(self.class);
    }
}

/// The 10-byte IPMI session wrapper (big-endian fields).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionWrapper {
    /// Authentication type; only [`AUTH_NONE`] is supported.
    pub auth_type: u8,
    /// Session sequence number.
    pub sequence: u32,
    /// Session id.
    pub session_id: u32,
    /// Byte count from the target address through the data checksum.
    /// Derived on encode; the decoded value drives payload sizing.
    pub message_len: u8,
}

/// An IPMI LAN message, request or response.
///
/// The checksum fields mirror the wire; [`encode_ipmi`] recomputes them
/// from the covered fields and never trusts stored values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IpmiMessage {
    /// Responder (target) slave address.
    pub target_address: u8,
    /// Target NetFn (bits 7:2) and LUN (bits 1:0).
    pub target_lun: u8,
    /// Checksum over target address and target NetFn/LUN.
    pub checksum: u8,
    /// Requester (source) slave address.
    pub source_address: u8,
    /// Request sequence (bits 7:2) and source LUN (bits 1:0).
    pub source_lun: u8,
    /// Command number within the NetFn.
    pub command: u8,
    /// Completion code; present in responses only.
    pub completion_code: Option<u8>,
    /// Variable-length request or response data.
    pub data: Vec<u8>,
    /// Trailing checksum over source address, source LUN, command, and data.
    pub data_checksum: u8,
}

impl IpmiMessage {
    /// Network function code, the high 6 bits of the target LUN byte.
    pub fn netfn(&self) -> u8 {
        (self.target_lun & 0xFC) >> 2
    }

    /// Target logical unit, the low 2 bits of the target LUN byte.
    pub fn target_lun_bits(&self) -> u8 {
        self.target_lun & 0x03
    }

    /// Request sequence number, the high 6 bits of the source LUN byte.
    pub fn request_sequence(&self) -> u8 {
        (self.source_lun & 0xFC) >> 2
    }

    /// Validate both message checksums as read off the wire.
    ///
    /// A valid frame sums to zero mod 256 over each covered range plus
    /// its checksum byte.
    pub fn validate_checksums(&self) -> Result<()> {
        let header = self
            .target_address
            .wrapping_add(self.target_lun)
            .wrapping_add(self.checksum);
        if header != 0 {
            return Err(Error::Protocol("invalid IPMI header checksum"));
        }

        let mut sum = self
            .source_address
            .wrapping_add(self.source_lun)
            .wrapping_add(self.command);
        for &b in &self.data {
            sum = sum.wrapping_add(b);
        }
        if sum.wrapping_add(self.data_checksum) != 0 {
            return Err(Error::Protocol("invalid IPMI data checksum"));
        }
        Ok(())
    }
}

/// Compute the standard 2's complement checksum used by IPMI LAN messages.
pub fn ipmi_checksum(bytes: &[u8]) -> u8 {
    let sum = bytes.iter().fold(0u8, |acc, &b| acc.wrapping_add(b));
    (!sum).wrapping_add(1)
}

/// Decode a session wrapper plus IPMI message from `bytes`.
///
/// Returns the number of bytes consumed along with the decoded
/// structures, so callers can spot trailing garbage. The payload length
/// is derived from the wrapper message length; a length that implies a
/// negative payload, or one exceeding the available bytes, is a
/// malformed frame. Checksums are not validated here.
pub fn decode_ipmi(bytes: &[u8]) -> Result<(usize, SessionWrapper, IpmiMessage)> {
    let fixed = SESSION_WRAPPER_LEN + MESSAGE_HEADER_LEN + DATA_CHECKSUM_LEN;
    if bytes.len() < fixed {
        return Err(Error::Protocol("IPMI frame too short"));
    }

    let wrapper = SessionWrapper {
        auth_type: bytes[0],
        sequence: u32::from_be_bytes(
            bytes[1..5]
                .try_into()
                .map_err(|_| Error::Protocol("invalid session sequence"))?,
        ),
        session_id: u32::from_be_bytes(
            bytes[5..9]
                .try_into()
                .map_err(|_| Error::Protocol("invalid session id"))?,
        ),
        message_len: bytes[9],
    };

    let declared = wrapper.message_len as usize;
    let data_len = declared
        .checked_sub(MESSAGE_HEADER_LEN + DATA_CHECKSUM_LEN)
        .ok_or(Error::Protocol(
            "message length shorter than fixed message header",
        ))?;

    let consumed = SESSION_WRAPPER_LEN + declared;
    if bytes.len() < consumed {
        return Err(Error::Protocol("message length exceeds available bytes"));
    }

    let m = &bytes[SESSION_WRAPPER_LEN..];
    let message = IpmiMessage {
        target_address: m[0],
        target_lun: m[1],
        checksum: m[2],
        source_address: m[3],
        source_lun: m[4],
        command: m[5],
        completion_code: None,
        data: m[MESSAGE_HEADER_LEN..MESSAGE_HEADER_LEN + data_len].to_vec(),
        data_checksum: m[MESSAGE_HEADER_LEN + data_len],
    };

    Ok((consumed, wrapper, message))
}

/// Serialize a session wrapper plus IPMI message into `out`.
///
/// Both checksums and the wrapper message length are recomputed from
/// the supplied field values; any stored values are overwritten. A
/// zero-length payload still gets a trailing checksum byte.
pub fn encode_ipmi(wrapper: &SessionWrapper, message: &IpmiMessage, out: &mut Vec<u8>) -> Result<()> {
    let body_len = message_len(message.completion_code.is_some(), message.data.len());
    let message_len_field =
        u8::try_from(body_len).map_err(|_| Error::Protocol("IPMI payload too large"))?;

    out.reserve(SESSION_WRAPPER_LEN + body_len);
    out.push(wrapper.auth_type);
    out.extend_from_slice(&wrapper.sequence.to_be_bytes());
    out.extend_from_slice(&wrapper.session_id.to_be_bytes());
    out.push(message_len_field);

    out.push(message.target_address);
    out.push(message.target_lun);
    out.push(ipmi_checksum(&[message.target_address, message.target_lun]));

    out.push(message.source_address);
    out.push(message.source_lun);
    out.push(message.command);
    if let Some(code) = message.completion_code {
        out.push(code);
    }
    out.extend_from_slice(&message.data);

    // Trailing checksum covers source address, source LUN, command, and
    // data; the completion code is not part of the covered range.
    let mut sum = message
        .source_address
        .wrapping_add(message.source_lun)
        .wrapping_add(message.command);
    for &b in &message.data {
        sum = sum.wrapping_add(b);
    }
    out.push((!sum).wrapping_add(1));

    Ok(())
}

/// Decode a full RMCP datagram into header, wrapper, and message.
///
/// Returns the total bytes consumed including the RMCP header.
pub fn decode_packet(datagram: &[u8]) -> Result<(usize, RmcpHeader, SessionWrapper, IpmiMessage)> {
    let header = RmcpHeader::decode(datagram)?;
    let (consumed, wrapper, message) = decode_ipmi(&datagram[RMCP_HEADER_LEN..])?;
    Ok((RMCP_HEADER_LEN + consumed, header, wrapper, message))
}

/// Serialize a full RMCP datagram from the canonical IPMI header
/// template plus the given wrapper and message.
pub fn encode_packet(wrapper: &SessionWrapper, message: &IpmiMessage) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(
        RMCP_HEADER_LEN
            + SESSION_WRAPPER_LEN
            + message_len(message.completion_code.is_some(), message.data.len()),
    );
    RmcpHeader::ipmi().encode(&mut out);
    encode_ipmi(wrapper, message, &mut out)?;
    Ok(out)
}
