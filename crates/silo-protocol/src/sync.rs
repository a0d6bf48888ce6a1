//! Content announcements between authenticated peers.
//!
//! A peer announces content ids it wants replicated; the receiver queues
//! them for pinning and acknowledges how many it accepted. Nothing moves
//! until the handshake has completed, which the session signals through a
//! shared flag.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use silo_types::ContentId;
use tracing::debug;

use crate::error::{ProtocolError, ProtocolResult};
use crate::message::{expect_end, put_field, take_field, Message};
use crate::mux::{MessageRange, Protocol};

pub const MSG_ANNOUNCE: u16 = 0;
pub const MSG_ACK: u16 = 1;
pub const RESERVED_MESSAGE_SLOTS: u16 = 8;

pub struct ContentSyncProtocol {
    authenticated: Arc<AtomicBool>,
    pending: Vec<ContentId>,
    acknowledged: u64,
}

impl ContentSyncProtocol {
    pub const MESSAGE_RANGE: MessageRange = MessageRange::new(0, MSG_ACK + RESERVED_MESSAGE_SLOTS);

    pub fn new(authenticated: Arc<AtomicBool>) -> Self {
        Self { authenticated, pending: Vec::new(), acknowledged: 0 }
    }

    fn ensure_authenticated(&self) -> ProtocolResult<()> {
        if self.authenticated.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(ProtocolError::NotAuthenticated)
        }
    }

    /// Build an Announce for `ids`, with a local message type.
    pub fn announce(&self, ids: &[ContentId]) -> ProtocolResult<Message> {
        self.ensure_authenticated()?;
        Ok(Message::new(MSG_ANNOUNCE, encode_announce(ids)?))
    }

    /// Drain ids announced by the peer since the last call.
    pub fn take_pending(&mut self) -> Vec<ContentId> {
        std::mem::take(&mut self.pending)
    }

    /// Total ids the peer has acknowledged.
    pub fn acknowledged(&self) -> u64 {
        self.acknowledged
    }
}

impl Protocol for ContentSyncProtocol {
    fn name(&self) -> &'static str {
        "sync"
    }

    fn message_range(&self) -> MessageRange {
        Self::MESSAGE_RANGE
    }

    fn consume(&mut self, message_type: u16, payload: &[u8]) -> ProtocolResult<Option<Message>> {
        self.ensure_authenticated()?;
        match message_type {
            MSG_ANNOUNCE => {
                let ids = decode_announce(payload)?;
                let count = ids.len() as u32;
                debug!(count, "peer announced content");
                self.pending.extend(ids);
                Ok(Some(Message::new(MSG_ACK, count.to_be_bytes().to_vec())))
            }
            MSG_ACK => {
                let count: [u8; 4] = payload
                    .try_into()
                    .map_err(|_| ProtocolError::Malformed(format!("ack of {} bytes", payload.len())))?;
                self.acknowledged += u32::from_be_bytes(count) as u64;
                Ok(None)
            }
            other => Err(ProtocolError::UnknownMessageType(other)),
        }
    }
}

/// `count(2) | (idLen(2) | id)*`
fn encode_announce(ids: &[ContentId]) -> ProtocolResult<Vec<u8>> {
    let count = u16::try_from(ids.len())
        .map_err(|_| ProtocolError::MessageTooLarge { size: ids.len(), max: u16::MAX as usize })?;
    let mut buf = Vec::new();
    buf.extend_from_slice(&count.to_be_bytes());
    for id in ids {
        put_field(&mut buf, id.as_str().as_bytes())?;
    }
    Ok(buf)
}

fn decode_announce(data: &[u8]) -> ProtocolResult<Vec<ContentId>> {
    if data.len() < 2 {
        return Err(ProtocolError::Malformed("announce without count".into()));
    }
    let count = u16::from_be_bytes([data[0], data[1]]) as usize;
    let mut rest = &data[2..];
    let mut ids = Vec::with_capacity(count);
    for _ in 0..count {
        let raw = take_field(&mut rest, "content id")?;
        let text = String::from_utf8(raw)
            .map_err(|_| ProtocolError::Malformed("content id is not UTF-8".into()))?;
        let id = ContentId::new(text).map_err(|e| ProtocolError::Malformed(e.to_string()))?;
        ids.push(id);
    }
    expect_end(rest)?;
    Ok(ids)
}
