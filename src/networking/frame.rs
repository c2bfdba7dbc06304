// Copyright (c) 2026 Cruster
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//     http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! CTP frame codec.
//!
//! A CTP message is a fixed 69-byte header followed by a payload:
//!
//! | offset | size | field |
//! |--------|------|-------|
//! | 0      | 1    | message type |
//! | 1      | 4    | sequence number (big-endian) |
//! | 5      | 32   | cluster id |
//! | 37     | 32   | sender id |
//!
//! There is no length field: the transport delivers datagram boundaries.
//! Datagrams are capped at 1400 bytes to stay clear of fragmentation, which
//! bounds payloads at 1331 bytes. Bit 0 of the type octet distinguishes
//! requests (0) from responses (1); a response carries the request's
//! sequence number plus one.

use crate::core::types::{ClusterId, PeerId, H256};
use std::net::{IpAddr, SocketAddr};
use thiserror::Error;

/// Maximum datagram size on the wire.
pub const MAX_DATAGRAM: usize = 1400;
/// Fixed header length: type + sequence + cluster id + sender id.
pub const HEADER_LEN: usize = 1 + 4 + 32 + 32;
/// Maximum payload length.
pub const MAX_PAYLOAD: usize = MAX_DATAGRAM - HEADER_LEN;

/// Frame codec errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    /// Payload exceeds [`MAX_PAYLOAD`].
    #[error("payload too large")]
    PayloadTooLarge,
    /// Datagram too short, too long, or otherwise unparseable.
    #[error("malformed frame")]
    MalformedFrame,
}

/// CTP message types.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum MsgType {
    StatusRequest,
    StatusResponse,
    Notification,
    NotificationAck,
    BlockRequest,
    BlockResponse,
    ClusterJoinRequest,
    ClusterJoinAck,
    ManifestRequest,
    ManifestResponse,
    CrinfoRequest,
    CrinfoResponse,
    NewCrinfoNotif,
    NewCrinfoAck,
    PeerlistPush,
    UnexpectedReq,
    InvalidRequest,
    /// Request that never receives a response.
    NoOp,
    ServerError,
    /// Unrecognized type code; dispatched to the unknown-request handler.
    Unknown(u8),
}

impl MsgType {
    /// Wire code for this type.
    pub fn code(self) -> u8 {
        match self {
            MsgType::StatusRequest => 0x00,
            MsgType::StatusResponse => 0x01,
            MsgType::Notification => 0x02,
            MsgType::NotificationAck => 0x03,
            MsgType::BlockRequest => 0x04,
            MsgType::BlockResponse => 0x05,
            MsgType::ClusterJoinRequest => 0x06,
            MsgType::ClusterJoinAck => 0x07,
            MsgType::ManifestRequest => 0x08,
            MsgType::ManifestResponse => 0x09,
            MsgType::CrinfoRequest => 0x0A,
            MsgType::CrinfoResponse => 0x0B,
            MsgType::NewCrinfoNotif => 0x0C,
            MsgType::NewCrinfoAck => 0x0D,
            MsgType::PeerlistPush => 0x10,
            MsgType::UnexpectedReq => 0xF9,
            MsgType::InvalidRequest => 0xFD,
            MsgType::NoOp => 0xFE,
            MsgType::ServerError => 0xFF,
            MsgType::Unknown(code) => code,
        }
    }

    /// Decode a wire code.
    pub fn from_code(code: u8) -> Self {
        match code {
            0x00 => MsgType::StatusRequest,
            0x01 => MsgType::StatusResponse,
            0x02 => MsgType::Notification,
            0x03 => MsgType::NotificationAck,
            0x04 => MsgType::BlockRequest,
            0x05 => MsgType::BlockResponse,
            0x06 => MsgType::ClusterJoinRequest,
            0x07 => MsgType::ClusterJoinAck,
            0x08 => MsgType::ManifestRequest,
            0x09 => MsgType::ManifestResponse,
            0x0A => MsgType::CrinfoRequest,
            0x0B => MsgType::CrinfoResponse,
            0x0C => MsgType::NewCrinfoNotif,
            0x0D => MsgType::NewCrinfoAck,
            0x10 => MsgType::PeerlistPush,
            0xF9 => MsgType::UnexpectedReq,
            0xFD => MsgType::InvalidRequest,
            0xFE => MsgType::NoOp,
            0xFF => MsgType::ServerError,
            other => MsgType::Unknown(other),
        }
    }

    /// Bit 0 of the type octet: set on responses.
    pub fn is_response(self) -> bool {
        self.code() & 0x01 == 0x01
    }

    /// Whether this type may be sent as a request.
    pub fn is_request(self) -> bool {
        !self.is_response()
    }
}

/// One CTP message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    /// Message type.
    pub msg_type: MsgType,
    /// Sequence number; responses carry the request's plus one.
    pub seq: u32,
    /// Cluster the message belongs to. Frames for other clusters are
    /// dropped silently.
    pub cluster: ClusterId,
    /// Sender's peer id.
    pub sender: PeerId,
    /// Payload, at most [`MAX_PAYLOAD`] bytes.
    pub payload: Vec<u8>,
}

impl Frame {
    /// Serialize to wire bytes.
    pub fn encode(&self) -> Result<Vec<u8>, FrameError> {
        if self.payload.len() > MAX_PAYLOAD {
            return Err(FrameError::PayloadTooLarge);
        }
        let mut out = Vec::with_capacity(HEADER_LEN + self.payload.len());
        out.push(self.msg_type.code());
        out.extend_from_slice(&self.seq.to_be_bytes());
        out.extend_from_slice(self.cluster.as_bytes());
        out.extend_from_slice(self.sender.as_bytes());
        out.extend_from_slice(&self.payload);
        Ok(out)
    }

    /// Parse wire bytes.
    pub fn decode(buf: &[u8]) -> Result<Frame, FrameError> {
        if buf.len() < HEADER_LEN || buf.len() > MAX_DATAGRAM {
            return Err(FrameError::MalformedFrame);
        }
        let msg_type = MsgType::from_code(buf[0]);
        let mut seq = [0u8; 4];
        seq.copy_from_slice(&buf[1..5]);
        let mut cluster = [0u8; 32];
        cluster.copy_from_slice(&buf[5..37]);
        let mut sender = [0u8; 32];
        sender.copy_from_slice(&buf[37..69]);
        Ok(Frame {
            msg_type,
            seq: u32::from_be_bytes(seq),
            cluster: H256::from_bytes(cluster),
            sender: H256::from_bytes(sender),
            payload: buf[HEADER_LEN..].to_vec(),
        })
    }
}

/// `BLOCK_RESPONSE` status codes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlockStatus {
    /// Peer has the block; bytes follow.
    Have,
    /// Peer does not have the block.
    NotHave,
    /// Block index out of range for the file.
    InvalidIndex,
}

impl BlockStatus {
    fn digit(self) -> char {
        match self {
            BlockStatus::Have => '0',
            BlockStatus::NotHave => '1',
            BlockStatus::InvalidIndex => '2',
        }
    }

    fn from_digit(c: char) -> Option<Self> {
        match c {
            '0' => Some(BlockStatus::Have),
            '1' => Some(BlockStatus::NotHave),
            '2' => Some(BlockStatus::InvalidIndex),
            _ => None,
        }
    }
}

/// `BLOCK_REQUEST` payload: `{filehash}-{blockid}`.
pub fn encode_block_request(hash: &H256, block_id: u32) -> Vec<u8> {
    format!("{}-{block_id}", hash.to_hex()).into_bytes()
}

/// Parse a `BLOCK_REQUEST` payload.
pub fn parse_block_request(payload: &[u8]) -> Option<(H256, u32)> {
    let text = std::str::from_utf8(payload).ok()?;
    let (hash, block) = text.split_once('-')?;
    Some((H256::from_hex(hash)?, block.parse().ok()?))
}

/// `BLOCK_RESPONSE` payload: `{filehash}-{blockid}-{status}\r\n\r\n{bytes}`.
pub fn encode_block_response(
    hash: &H256,
    block_id: u32,
    status: BlockStatus,
    bytes: &[u8],
) -> Vec<u8> {
    let mut out = format!("{}-{block_id}-{}\r\n\r\n", hash.to_hex(), status.digit()).into_bytes();
    out.extend_from_slice(bytes);
    out
}

/// Parse a `BLOCK_RESPONSE` payload.
pub fn parse_block_response(payload: &[u8]) -> Option<(H256, u32, BlockStatus, &[u8])> {
    let sep = payload.windows(4).position(|w| w == b"\r\n\r\n")?;
    let head = std::str::from_utf8(&payload[..sep]).ok()?;
    let bytes = &payload[sep + 4..];
    let (hash, rest) = head.split_once('-')?;
    let (block, status) = rest.rsplit_once('-')?;
    let mut chars = status.chars();
    let digit = chars.next()?;
    if chars.next().is_some() {
        return None;
    }
    Some((
        H256::from_hex(hash)?,
        block.parse().ok()?,
        BlockStatus::from_digit(digit)?,
        bytes,
    ))
}

/// `CRINFO_REQUEST` payload: `filename: {name}`.
pub fn encode_crinfo_request(name: &str) -> Vec<u8> {
    format!("filename: {name}").into_bytes()
}

/// Parse a `CRINFO_REQUEST` payload.
pub fn parse_crinfo_request(payload: &[u8]) -> Option<&str> {
    let text = std::str::from_utf8(payload).ok()?;
    text.strip_prefix("filename: ")
}

/// `NEW_CRINFO_NOTIF` payload: `{filename}\r\n\r\n{crinfo bytes}`.
pub fn encode_new_crinfo(name: &str, crinfo: &[u8]) -> Vec<u8> {
    let mut out = format!("{name}\r\n\r\n").into_bytes();
    out.extend_from_slice(crinfo);
    out
}

/// Parse a `NEW_CRINFO_NOTIF` payload.
pub fn parse_new_crinfo(payload: &[u8]) -> Option<(&str, &[u8])> {
    let sep = payload.windows(4).position(|w| w == b"\r\n\r\n")?;
    let name = std::str::from_utf8(&payload[..sep]).ok()?;
    Some((name, &payload[sep + 4..]))
}

/// Peer-list payload (`CLUSTER_JOIN_ACK`, `PEERLIST_PUSH`): one
/// `{peer_id} {ip} {port}` per line, CRLF-separated.
pub fn encode_peer_list(entries: &[(PeerId, SocketAddr)]) -> Vec<u8> {
    entries
        .iter()
        .map(|(id, addr)| format!("{} {} {}", id.to_hex(), addr.ip(), addr.port()))
        .collect::<Vec<_>>()
        .join("\r\n")
        .into_bytes()
}

/// Parse a peer-list payload. Unparseable lines are skipped.
pub fn parse_peer_list(payload: &[u8]) -> Vec<(PeerId, SocketAddr)> {
    let Ok(text) = std::str::from_utf8(payload) else {
        return Vec::new();
    };
    text.split("\r\n")
        .filter_map(|line| {
            let mut fields = line.trim().split(' ');
            let id = H256::from_hex(fields.next()?)?;
            let ip: IpAddr = fields.next()?.parse().ok()?;
            let port: u16 = fields.next()?.parse().ok()?;
            if fields.next().is_some() {
                return None;
            }
            Some((id, SocketAddr::new(ip, port)))
        })
        .collect()
}
