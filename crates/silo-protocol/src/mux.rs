//! Merging independently numbered protocols into one message-type space.
//!
//! Every sub-protocol declares an inclusive [`MessageRange`]. Protocols are
//! laid out in registration order: the first starts at global type 0, each
//! following one starts right after the slots of all protocols before it.
//! Range sizes are therefore a hard contract: a protocol that later grows
//! beyond its declared range shifts every sibling behind it, so protocols
//! reserve spare slots up front.
//!
//! Ordering matters for [`MultiProtocol::initiate`] too: only the first
//! protocol able to initiate is asked to.

use std::collections::HashMap;

use tracing::debug;

use crate::error::{ProtocolError, ProtocolResult};
use crate::message::Message;

/// Inclusive range of local message codes a protocol uses.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MessageRange {
    pub low: u16,
    pub high: u16,
}

impl MessageRange {
    pub const fn new(low: u16, high: u16) -> Self {
        Self { low, high }
    }

    /// Number of slots. Widened so the full `0..=u16::MAX` range fits.
    /// Evaluated in a `const` context an inverted range fails to compile.
    pub const fn len(&self) -> u32 {
        (self.high - self.low) as u32 + 1
    }

    pub const fn is_valid(&self) -> bool {
        self.low <= self.high
    }

    pub const fn contains(&self, code: u16) -> bool {
        code >= self.low && code <= self.high
    }
}

/// One message protocol that can be multiplexed.
pub trait Protocol: Send {
    fn name(&self) -> &'static str;

    fn message_range(&self) -> MessageRange;

    /// Whether this protocol can open an exchange.
    fn initiates(&self) -> bool {
        false
    }

    /// Produce the opening message. Only called when [`initiates`](Self::initiates)
    /// returns `true`.
    fn initiate(&mut self) -> ProtocolResult<Message> {
        Err(ProtocolError::NothingToInitiate)
    }

    /// Consume a message carrying a local type code, optionally replying.
    fn consume(&mut self, message_type: u16, payload: &[u8]) -> ProtocolResult<Option<Message>>;
}

impl<T: Protocol + ?Sized> Protocol for Box<T> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn message_range(&self) -> MessageRange {
        (**self).message_range()
    }

    fn initiates(&self) -> bool {
        (**self).initiates()
    }

    fn initiate(&mut self) -> ProtocolResult<Message> {
        (**self).initiate()
    }

    fn consume(&mut self, message_type: u16, payload: &[u8]) -> ProtocolResult<Option<Message>> {
        (**self).consume(message_type, payload)
    }
}

/// Direction a hook fires for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    /// Messages consumed from the peer.
    Incoming,
    /// Messages produced for the peer.
    Outgoing,
    Both,
}

/// Side-effect hook, called with `(protocol name, local type, payload)`.
///
/// Hooks run after the owning protocol has accepted or produced the
/// message. They cannot veto anything; use them to coordinate, e.g. to
/// start a second phase once a handshake completes.
pub type Handler = Box<dyn Fn(&'static str, u16, &[u8]) + Send + Sync>;

#[derive(Default)]
struct Hooks {
    incoming: Vec<Handler>,
    outgoing: Vec<Handler>,
}

/// Where a global type lands.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Slot {
    protocol: usize,
    offset: u16,
}

/// Multiplexer over an ordered list of protocols.
pub struct MultiProtocol<P: Protocol = Box<dyn Protocol>> {
    protocols: Vec<P>,
    /// Indexed by global type.
    forward: Vec<Slot>,
    /// Offset of each protocol, by index.
    back: Vec<u16>,
    hooks: HashMap<u16, Hooks>,
}

impl<P: Protocol> MultiProtocol<P> {
    /// Build the mapping. Fails if any protocol declares `low > high`.
    pub fn new(protocols: Vec<P>) -> ProtocolResult<Self> {
        let mut forward = Vec::new();
        let mut back = Vec::with_capacity(protocols.len());
        // Next free global type. May reach one past `u16::MAX` once every
        // type is taken.
        let mut next: u32 = 0;

        for (index, proto) in protocols.iter().enumerate() {
            let range = proto.message_range();
            let invalid = || ProtocolError::InvalidMessageRange {
                protocol: proto.name(),
                low: range.low,
                high: range.high,
            };
            if !range.is_valid() {
                return Err(invalid());
            }
            let offset = u16::try_from(next).map_err(|_| invalid())?;
            let end = next + range.len();
            if end > u32::from(u16::MAX) + 1 {
                return Err(invalid());
            }
            debug!(protocol = proto.name(), offset, low = range.low, high = range.high, "mapping protocol");
            back.push(offset);
            forward.extend((0..range.len()).map(|_| Slot { protocol: index, offset }));
            next = end;
        }

        Ok(Self { protocols, forward, back, hooks: HashMap::new() })
    }

    pub fn protocols(&self) -> &[P] {
        &self.protocols
    }

    pub fn protocol(&self, index: usize) -> Option<&P> {
        self.protocols.get(index)
    }

    pub fn protocol_mut(&mut self, index: usize) -> Option<&mut P> {
        self.protocols.get_mut(index)
    }

    /// Global offset assigned to protocol `index`.
    pub fn offset_of(&self, index: usize) -> Option<u16> {
        self.back.get(index).copied()
    }

    /// Map a protocol's local type to the global type.
    pub fn map_type(&self, index: usize, local: u16) -> ProtocolResult<u16> {
        let proto = self.protocols.get(index).ok_or(ProtocolError::UnknownMessageType(local))?;
        let range = proto.message_range();
        if !range.contains(local) {
            return Err(ProtocolError::UnknownMessageType(local));
        }
        Ok(self.back[index] + (local - range.low))
    }

    /// Map a global type back to `(protocol index, local type, offset)`.
    pub fn lookup_type(&self, global: u16) -> ProtocolResult<(usize, u16, u16)> {
        let slot = self
            .forward
            .get(global as usize)
            .ok_or(ProtocolError::UnknownMessageType(global))?;
        let low = self.protocols[slot.protocol].message_range().low;
        Ok((slot.protocol, global - slot.offset + low, slot.offset))
    }

    /// Register a hook for a global message type.
    pub fn register(
        &mut self,
        global: u16,
        direction: Direction,
        handler: impl Fn(&'static str, u16, &[u8]) + Send + Sync + 'static,
    ) -> ProtocolResult<()> {
        self.lookup_type(global)?;
        let hooks = self.hooks.entry(global).or_default();
        match direction {
            Direction::Incoming => hooks.incoming.push(Box::new(handler)),
            Direction::Outgoing => hooks.outgoing.push(Box::new(handler)),
            Direction::Both => {
                // One closure, two lists: share it behind an Arc.
                let shared = std::sync::Arc::new(handler);
                let other = shared.clone();
                hooks.incoming.push(Box::new(move |p: &'static str, t: u16, m: &[u8]| (*shared)(p, t, m)));
                hooks.outgoing.push(Box::new(move |p: &'static str, t: u16, m: &[u8]| (*other)(p, t, m)));
            }
        }
        debug!(global, ?direction, "registered hook");
        Ok(())
    }

    /// Run the hooks registered for a global type in one direction.
    pub fn run_handlers(&self, global: u16, payload: &[u8], direction: Direction) {
        let Some(hooks) = self.hooks.get(&global) else {
            return;
        };
        let Ok((index, local, _)) = self.lookup_type(global) else {
            return;
        };
        let name = self.protocols[index].name();
        let lists: &[&Vec<Handler>] = match direction {
            Direction::Incoming => &[&hooks.incoming],
            Direction::Outgoing => &[&hooks.outgoing],
            Direction::Both => &[&hooks.incoming, &hooks.outgoing],
        };
        for list in lists {
            for handler in list.iter() {
                handler(name, local, payload);
            }
        }
    }

    /// Ask the first protocol able to initiate for its opening message.
    pub fn initiate(&mut self) -> ProtocolResult<Message> {
        let index = self
            .protocols
            .iter()
            .position(|p| p.initiates())
            .ok_or(ProtocolError::NothingToInitiate)?;
        let local = self.protocols[index].initiate()?;
        let message = self.emit(index, local)?;
        debug!(protocol = self.protocols[index].name(), global = message.message_type, "initiated");
        Ok(message)
    }

    /// Translate a message produced directly by protocol `index` into the
    /// global space and fire its outgoing hooks.
    pub fn emit(&self, index: usize, local: Message) -> ProtocolResult<Message> {
        let global = self.map_type(index, local.message_type)?;
        self.run_handlers(global, &local.payload, Direction::Outgoing);
        Ok(Message::new(global, local.payload))
    }

    /// Route a message carrying a global type to its protocol.
    ///
    /// On success the incoming hooks for `global` fire, followed by the
    /// outgoing hooks for the reply, if the protocol produced one.
    pub fn consume(&mut self, global: u16, payload: &[u8]) -> ProtocolResult<Option<Message>> {
        let (index, local, _) = self.lookup_type(global)?;
        debug!(protocol = self.protocols[index].name(), global, local, "consuming message");
        let reply = self.protocols[index].consume(local, payload)?;
        self.run_handlers(global, payload, Direction::Incoming);
        reply.map(|m| self.emit(index, m)).transpose()
    }
}
