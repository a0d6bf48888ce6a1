//! Peer protocols for the Silo storage node.
//!
//! Storage peers talk over a single untrusted byte stream. On that stream
//! several independent message protocols are multiplexed into one
//! message-type space:
//!
//! - [`MutualAuthenticator`] proves both sides hold the private key behind
//!   the public key they advertise (ECDH + encrypted, mutated challenge).
//! - [`ContentSyncProtocol`] carries content announcements, and refuses to
//!   do so until the handshake has completed.
//! - [`MultiProtocol`] assigns each protocol a contiguous offset and routes
//!   global message types back to the owning protocol.
//!
//! [`PeerSession`] wires the three together; [`FrameCodec`] puts the
//! resulting messages on the wire.

pub mod auth;
pub mod codec;
pub mod endpoint;
pub mod error;
pub mod message;
pub mod mux;
pub mod session;
pub mod sync;

pub use auth::{mutate, AuthConfig, AuthState, MutualAuthenticator, Mutation};
pub use codec::{read_frame, write_frame, FrameCodec, MAX_MESSAGE_SIZE};
pub use endpoint::{endpoints, HealthResponse, PROTOCOL_VERSION};
pub use error::{ProtocolError, ProtocolResult};
pub use message::{Challenge, Message, Sealed};
pub use mux::{Direction, Handler, MessageRange, MultiProtocol, Protocol};
pub use session::{PeerProtocol, PeerSession, SYNC_OFFSET};
pub use sync::ContentSyncProtocol;
