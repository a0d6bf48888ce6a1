//! One authenticated peer connection: handshake first, then content sync.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use silo_crypto::{Keypair, PublicKey};
use silo_types::ContentId;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, info, warn};

use crate::auth::{AuthConfig, MutualAuthenticator, MSG_CHALLENGE, MSG_FINALIZE};
use crate::codec::{read_frame, write_frame};
use crate::error::{ProtocolError, ProtocolResult};
use crate::message::Message;
use crate::mux::{Direction, MessageRange, MultiProtocol, Protocol};
use crate::sync::ContentSyncProtocol;

const AUTH_INDEX: usize = 0;
const SYNC_INDEX: usize = 1;

/// Global offset of the sync protocol. Fixed by the authenticator's
/// declared range, so it is known at compile time.
pub const SYNC_OFFSET: u16 = MutualAuthenticator::MESSAGE_RANGE.len() as u16;

/// The protocols a peer session multiplexes.
pub enum PeerProtocol {
    Auth(MutualAuthenticator),
    Sync(ContentSyncProtocol),
}

impl Protocol for PeerProtocol {
    fn name(&self) -> &'static str {
        match self {
            Self::Auth(p) => p.name(),
            Self::Sync(p) => p.name(),
        }
    }

    fn message_range(&self) -> MessageRange {
        match self {
            Self::Auth(p) => p.message_range(),
            Self::Sync(p) => p.message_range(),
        }
    }

    fn initiates(&self) -> bool {
        match self {
            Self::Auth(p) => p.initiates(),
            Self::Sync(p) => p.initiates(),
        }
    }

    fn initiate(&mut self) -> ProtocolResult<Message> {
        match self {
            Self::Auth(p) => Protocol::initiate(p),
            Self::Sync(p) => p.initiate(),
        }
    }

    fn consume(&mut self, message_type: u16, payload: &[u8]) -> ProtocolResult<Option<Message>> {
        match self {
            Self::Auth(p) => p.consume(message_type, payload),
            Self::Sync(p) => p.consume(message_type, payload),
        }
    }
}

/// Handshake plus content sync over one connection.
///
/// The Finalize message flips the session's authenticated flag: the
/// initiator observes it going out, the responder coming in. A new
/// Challenge in either direction clears it again.
pub struct PeerSession {
    mux: MultiProtocol<PeerProtocol>,
    authenticated: Arc<AtomicBool>,
}

impl PeerSession {
    pub fn new(keypair: Arc<Keypair>, peer: Option<PublicKey>, config: AuthConfig) -> ProtocolResult<Self> {
        let authenticated = Arc::new(AtomicBool::new(false));
        let mut mux = MultiProtocol::new(vec![
            PeerProtocol::Auth(MutualAuthenticator::new(keypair, peer, config)),
            PeerProtocol::Sync(ContentSyncProtocol::new(authenticated.clone())),
        ])?;

        let flag = authenticated.clone();
        mux.register(MSG_FINALIZE, Direction::Both, move |_, _, _| {
            flag.store(true, Ordering::Release);
        })?;
        let flag = authenticated.clone();
        mux.register(MSG_CHALLENGE, Direction::Both, move |_, _, _| {
            flag.store(false, Ordering::Release);
        })?;

        Ok(Self { mux, authenticated })
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated.load(Ordering::Acquire)
    }

    pub fn peer(&self) -> Option<PublicKey> {
        self.auth().peer().copied()
    }

    /// Open the handshake. Fails with `UnknownPeer` if the peer key is not known.
    pub fn initiate(&mut self) -> ProtocolResult<Message> {
        self.mux.initiate()
    }

    /// Handle one message with a global type, returning the reply if any.
    pub fn consume(&mut self, global: u16, payload: &[u8]) -> ProtocolResult<Option<Message>> {
        let result = self.mux.consume(global, payload);
        if result.is_err() {
            // Failed handshakes reset the authenticator without firing hooks.
            let auth = self.auth().is_authenticated();
            self.authenticated.store(auth, Ordering::Release);
        }
        result
    }

    /// Announce content ids to the peer. Requires a completed handshake.
    pub fn announce(&mut self, ids: &[ContentId]) -> ProtocolResult<Message> {
        let local = self.sync().announce(ids)?;
        self.mux.emit(SYNC_INDEX, local)
    }

    /// Content ids the peer has announced since the last call.
    pub fn take_sync_requests(&mut self) -> Vec<ContentId> {
        match self.mux.protocol_mut(SYNC_INDEX) {
            Some(PeerProtocol::Sync(sync)) => sync.take_pending(),
            _ => Vec::new(),
        }
    }

    pub fn acknowledged(&self) -> u64 {
        self.sync().acknowledged()
    }

    pub fn reset(&mut self) {
        if let Some(PeerProtocol::Auth(auth)) = self.mux.protocol_mut(AUTH_INDEX) {
            auth.reset();
        }
        self.authenticated.store(false, Ordering::Release);
    }

    /// Serve the connection until the peer closes it, replying to every
    /// message that produces a reply. Protocol errors end the session.
    pub async fn run<R, W>(&mut self, reader: &mut R, writer: &mut W) -> ProtocolResult<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        while let Some(msg) = read_frame(reader).await? {
            let was_authenticated = self.is_authenticated();
            match self.consume(msg.message_type, &msg.payload) {
                Ok(Some(reply)) => write_frame(writer, &reply).await?,
                Ok(None) => {}
                Err(e) => {
                    warn!(error = %e, global = msg.message_type, "peer session failed");
                    return Err(e);
                }
            }
            if !was_authenticated && self.is_authenticated() {
                debug!(peer = ?self.peer().map(|p| p.short()), "session authenticated");
            }
        }
        info!(peer = ?self.peer().map(|p| p.short()), "peer closed connection");
        Ok(())
    }

    fn auth(&self) -> &MutualAuthenticator {
        match self.mux.protocol(AUTH_INDEX) {
            Some(PeerProtocol::Auth(auth)) => auth,
            _ => unreachable!("session is built with the authenticator first"),
        }
    }

    fn sync(&self) -> &ContentSyncProtocol {
        match self.mux.protocol(SYNC_INDEX) {
            Some(PeerProtocol::Sync(sync)) => sync,
            _ => unreachable!("session is built with sync second"),
        }
    }
}

impl std::fmt::Debug for PeerSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerSession")
            .field("auth", self.auth())
            .field("authenticated", &self.is_authenticated())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::{MSG_ACK, MSG_ANNOUNCE};

    fn sessions() -> (PeerSession, PeerSession) {
        let a = Arc::new(Keypair::generate());
        let b = Arc::new(Keypair::generate());
        let initiator = PeerSession::new(a, Some(b.public_key()), AuthConfig::default()).unwrap();
        let responder = PeerSession::new(b, None, AuthConfig::default()).unwrap();
        (initiator, responder)
    }

    fn handshake(a: &mut PeerSession, b: &mut PeerSession) {
        let c = a.initiate().unwrap();
        let r = b.consume(c.message_type, &c.payload).unwrap().unwrap();
        let f = a.consume(r.message_type, &r.payload).unwrap().unwrap();
        assert!(b.consume(f.message_type, &f.payload).unwrap().is_none());
    }

    #[test]
    fn sync_offset_follows_auth_range() {
        let (a, _) = sessions();
        assert_eq!(SYNC_OFFSET, 13);
        assert_eq!(a.mux.offset_of(SYNC_INDEX), Some(SYNC_OFFSET));
    }

    #[test]
    fn finalize_hooks_flip_both_sides() {
        let (mut a, mut b) = sessions();
        let c = a.initiate().unwrap();
        let r = b.consume(c.message_type, &c.payload).unwrap().unwrap();
        assert!(!a.is_authenticated() && !b.is_authenticated());

        let f = a.consume(r.message_type, &r.payload).unwrap().unwrap();
        assert_eq!(f.message_type, MSG_FINALIZE);
        assert!(a.is_authenticated());
        assert!(!b.is_authenticated());

        b.consume(f.message_type, &f.payload).unwrap();
        assert!(b.is_authenticated());
        assert_eq!(b.peer(), Some(a.auth().public_key()));
    }

    #[test]
    fn sync_gated_on_handshake() {
        let (mut a, mut b) = sessions();
        let ids = vec![ContentId::new("asset-1").unwrap()];
        assert!(matches!(a.announce(&ids), Err(ProtocolError::NotAuthenticated)));
        assert!(matches!(
            b.consume(SYNC_OFFSET + MSG_ANNOUNCE, &[0, 0]),
            Err(ProtocolError::NotAuthenticated)
        ));

        handshake(&mut a, &mut b);
        let announce = a.announce(&ids).unwrap();
        assert_eq!(announce.message_type, SYNC_OFFSET + MSG_ANNOUNCE);

        let ack = b.consume(announce.message_type, &announce.payload).unwrap().unwrap();
        assert_eq!(ack.message_type, SYNC_OFFSET + MSG_ACK);
        assert_eq!(b.take_sync_requests(), ids);

        a.consume(ack.message_type, &ack.payload).unwrap();
        assert_eq!(a.acknowledged(), 1);
    }

    #[test]
    fn new_challenge_clears_flag() {
        let (mut a, mut b) = sessions();
        handshake(&mut a, &mut b);
        let c = a.initiate().unwrap();
        assert!(!a.is_authenticated());
        b.consume(c.message_type, &c.payload).unwrap();
        assert!(!b.is_authenticated());
    }

    #[test]
    fn failed_handshake_clears_flag() {
        let (mut a, mut b) = sessions();
        handshake(&mut a, &mut b);
        let stranger = PeerSession::new(
            Arc::new(Keypair::generate()),
            Some(Keypair::generate().public_key()),
            AuthConfig::default(),
        )
        .map(|mut s| s.initiate().unwrap())
        .unwrap();
        // Pinned key mismatch resets the responder.
        assert!(b.consume(stranger.message_type, &stranger.payload).is_err());
        assert!(!b.is_authenticated());
    }

    #[test]
    fn responder_cannot_initiate_without_key() {
        let (_, mut b) = sessions();
        assert!(matches!(b.initiate(), Err(ProtocolError::NothingToInitiate)));
    }

    #[tokio::test]
    async fn run_answers_over_stream() {
        let (mut a, mut b) = sessions();
        let (client, server) = tokio::io::duplex(1024);
        let (mut server_rd, mut server_wr) = tokio::io::split(server);
        let responder = tokio::spawn(async move {
            b.run(&mut server_rd, &mut server_wr).await.map(|_| b)
        });

        let (mut client_rd, mut client_wr) = tokio::io::split(client);
        let challenge = a.initiate().unwrap();
        write_frame(&mut client_wr, &challenge).await.unwrap();
        let response = read_frame(&mut client_rd).await.unwrap().unwrap();
        let finalize = a.consume(response.message_type, &response.payload).unwrap().unwrap();
        write_frame(&mut client_wr, &finalize).await.unwrap();
        drop(client_wr);
        drop(client_rd);

        let b = responder.await.unwrap().unwrap();
        assert!(a.is_authenticated());
        assert!(b.is_authenticated());
    }
}
