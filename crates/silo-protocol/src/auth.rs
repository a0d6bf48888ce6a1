//! Mutual authentication between storage peers.
//!
//! Both sides derive the same secret by ECDH. The initiator encrypts a
//! random challenge under that secret; the responder can only produce the
//! expected answer (the challenge after mutation step 1, encrypted under
//! the IV after mutation step 1) if it holds the private key behind the
//! public key it is known by. The initiator then proves the same thing
//! back with mutation step 2.
//!
//! ```text
//! initiator                          responder
//!   Challenge(iv, pk, E(c, iv))  ->
//!                                <-  Response(E(m1(c), m1(iv)))
//!   Finalize(E(m2(m1(c)), m2(iv))) ->
//! ```

use std::sync::Arc;

use rand::RngCore;
use silo_crypto::{decrypt, encrypt, random_iv, Iv, Keypair, PublicKey, SharedSecret};
use tracing::{debug, warn};

use crate::error::{ProtocolError, ProtocolResult};
use crate::message::{Challenge, Message, Sealed};
use crate::mux::{MessageRange, Protocol};

pub const MSG_CHALLENGE: u16 = 0;
pub const MSG_RESPONSE: u16 = 1;
pub const MSG_FINALIZE: u16 = 2;

/// Unused codes kept after Finalize so that new handshake messages do not
/// shift the offsets of protocols multiplexed behind this one.
pub const RESERVED_MESSAGE_SLOTS: u16 = 10;

/// Which mutation to apply to a decrypted challenge or an IV.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mutation {
    /// `b[b[0] % n] += 1`
    First,
    /// `b[b[b[0] % n] % n] += 1`
    Second,
}

/// Apply a mutation step to a copy of `buf`.
///
/// Deterministic and public: its only job is to show the other side
/// actually decrypted the buffer, since echoing the ciphertext back
/// unchanged does not validate. An empty buffer is returned unchanged.
pub fn mutate(buf: &[u8], step: Mutation) -> Vec<u8> {
    let mut out = buf.to_vec();
    mutate_in_place(&mut out, step);
    out
}

fn mutate_in_place(buf: &mut [u8], step: Mutation) {
    let n = buf.len();
    if n == 0 {
        return;
    }
    let i = buf[0] as usize % n;
    let target = match step {
        Mutation::First => i,
        Mutation::Second => buf[i] as usize % n,
    };
    buf[target] = buf[target].wrapping_add(1);
}

fn mutate_iv(iv: &Iv, step: Mutation) -> Iv {
    let mut out = *iv;
    mutate_in_place(&mut out, step);
    out
}

#[derive(Clone, Debug)]
pub struct AuthConfig {
    /// Size of the random challenge in bytes. Must be non-zero.
    pub challenge_size: usize,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self { challenge_size: 32 }
    }
}

/// Position in the handshake; doubles as the last message type handled.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AuthState {
    Idle,
    SentChallenge,
    SentResponse,
    Finalized,
}

/// Per-attempt material. Written once per attempt, wiped by `reset`.
#[derive(Default)]
struct Attempt {
    secret: Option<SharedSecret>,
    iv: Option<Iv>,
    challenge: Option<Vec<u8>>,
}

/// Handshake state machine for one peer pair.
///
/// The peer's public key is either known up front (initiator) or learned
/// from the first Challenge (responder). Once set it never changes: a
/// Challenge carrying a different key fails with
/// [`ProtocolError::PublicKeyMismatch`].
pub struct MutualAuthenticator {
    keypair: Arc<Keypair>,
    peer: Option<PublicKey>,
    config: AuthConfig,
    state: AuthState,
    attempt: Attempt,
    authenticated: bool,
}

impl MutualAuthenticator {
    pub const MESSAGE_RANGE: MessageRange = MessageRange::new(0, MSG_FINALIZE + RESERVED_MESSAGE_SLOTS);

    pub fn new(keypair: Arc<Keypair>, peer: Option<PublicKey>, config: AuthConfig) -> Self {
        Self {
            keypair,
            peer,
            config,
            state: AuthState::Idle,
            attempt: Attempt::default(),
            authenticated: false,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    pub fn state(&self) -> AuthState {
        self.state
    }

    pub fn peer(&self) -> Option<&PublicKey> {
        self.peer.as_ref()
    }

    pub fn public_key(&self) -> PublicKey {
        self.keypair.public_key()
    }

    /// Return to `Idle`, dropping the secret, IV, challenge and the
    /// authenticated flag. The pinned peer key is kept.
    pub fn reset(&mut self) {
        if self.state != AuthState::Idle {
            debug!(peer = %self.peer_label(), from = ?self.state, "resetting handshake");
        }
        self.state = AuthState::Idle;
        self.attempt = Attempt::default();
        self.authenticated = false;
    }

    /// Start a handshake with the known peer, producing a Challenge.
    pub fn initiate(&mut self) -> ProtocolResult<Message> {
        let peer = self.peer.ok_or(ProtocolError::UnknownPeer)?;
        if self.config.challenge_size == 0 {
            return Err(ProtocolError::Malformed("challenge size must be non-zero".into()));
        }
        self.reset();

        let secret = self.keypair.shared_secret(&peer);
        let iv = random_iv();
        let mut challenge = vec![0u8; self.config.challenge_size];
        rand::thread_rng().fill_bytes(&mut challenge);

        let payload = Challenge {
            iv,
            public_key: self.keypair.public_key().to_bytes().to_vec(),
            ciphertext: encrypt(&secret, &iv, &challenge),
        }
        .encode()?;

        self.attempt = Attempt { secret: Some(secret), iv: Some(iv), challenge: Some(challenge) };
        self.state = AuthState::SentChallenge;
        debug!(peer = %peer.short(), "sent challenge");
        Ok(Message::new(MSG_CHALLENGE, payload))
    }

    fn handle_challenge(&mut self, payload: &[u8]) -> ProtocolResult<Message> {
        if self.state != AuthState::Idle {
            self.reset();
        }
        let msg = Challenge::decode(payload)?;
        if msg.ciphertext.is_empty() {
            return Err(ProtocolError::Malformed("empty challenge".into()));
        }
        let claimed = PublicKey::from_bytes(&msg.public_key)?;
        match self.peer {
            Some(pinned) if pinned != claimed => {
                warn!(expected = %pinned.short(), claimed = %claimed.short(), "peer key mismatch");
                return Err(ProtocolError::PublicKeyMismatch);
            }
            Some(_) => {}
            None => self.peer = Some(claimed),
        }

        let secret = self.keypair.shared_secret(&claimed);
        let challenge = decrypt(&secret, &msg.iv, &msg.ciphertext);
        let answer = mutate(&challenge, Mutation::First);
        let ciphertext = encrypt(&secret, &mutate_iv(&msg.iv, Mutation::First), &answer);
        let payload = Sealed { ciphertext }.encode()?;

        self.attempt = Attempt { secret: Some(secret), iv: Some(msg.iv), challenge: Some(challenge) };
        self.state = AuthState::SentResponse;
        debug!(peer = %claimed.short(), "answered challenge");
        Ok(Message::new(MSG_RESPONSE, payload))
    }

    fn handle_response(&mut self, payload: &[u8]) -> ProtocolResult<Message> {
        if self.state != AuthState::SentChallenge {
            return Err(ProtocolError::UnexpectedMessage {
                received: MSG_RESPONSE,
                reason: "no challenge outstanding",
            });
        }
        let (secret, iv, challenge) = self.attempt_material(MSG_RESPONSE)?;
        let sealed = Sealed::decode(payload)?;

        let candidate = decrypt(&secret, &mutate_iv(&iv, Mutation::First), &sealed.ciphertext);
        if candidate != mutate(&challenge, Mutation::First) {
            return Err(self.fail("response did not match challenge"));
        }

        let proof = mutate(&candidate, Mutation::Second);
        let ciphertext = encrypt(&secret, &mutate_iv(&iv, Mutation::Second), &proof);
        let payload = Sealed { ciphertext }.encode()?;

        self.state = AuthState::Finalized;
        self.authenticated = true;
        debug!(peer = %self.peer_label(), "peer authenticated (initiator)");
        Ok(Message::new(MSG_FINALIZE, payload))
    }

    fn handle_finalize(&mut self, payload: &[u8]) -> ProtocolResult<()> {
        if self.state != AuthState::SentResponse {
            return Err(ProtocolError::UnexpectedMessage {
                received: MSG_FINALIZE,
                reason: "no response outstanding",
            });
        }
        let (secret, iv, challenge) = self.attempt_material(MSG_FINALIZE)?;
        let sealed = Sealed::decode(payload)?;

        let candidate = decrypt(&secret, &mutate_iv(&iv, Mutation::Second), &sealed.ciphertext);
        let expected = mutate(&mutate(&challenge, Mutation::First), Mutation::Second);
        if candidate != expected {
            return Err(self.fail("finalize did not match challenge"));
        }

        self.state = AuthState::Finalized;
        self.authenticated = true;
        debug!(peer = %self.peer_label(), "peer authenticated (responder)");
        Ok(())
    }

    fn attempt_material(&self, received: u16) -> ProtocolResult<(SharedSecret, Iv, Vec<u8>)> {
        match &self.attempt {
            Attempt { secret: Some(s), iv: Some(iv), challenge: Some(c) } => {
                Ok((s.clone(), *iv, c.clone()))
            }
            _ => Err(ProtocolError::UnexpectedMessage {
                received,
                reason: "handshake material missing",
            }),
        }
    }

    fn fail(&mut self, reason: &str) -> ProtocolError {
        warn!(peer = %self.peer_label(), reason, "authentication failed");
        self.reset();
        ProtocolError::AuthenticationFailed
    }

    fn peer_label(&self) -> String {
        self.peer.map(|p| p.short()).unwrap_or_else(|| "unknown".into())
    }
}

impl Protocol for MutualAuthenticator {
    fn name(&self) -> &'static str {
        "auth"
    }

    fn message_range(&self) -> MessageRange {
        Self::MESSAGE_RANGE
    }

    fn initiates(&self) -> bool {
        self.peer.is_some()
    }

    fn initiate(&mut self) -> ProtocolResult<Message> {
        MutualAuthenticator::initiate(self)
    }

    fn consume(&mut self, message_type: u16, payload: &[u8]) -> ProtocolResult<Option<Message>> {
        match message_type {
            MSG_CHALLENGE => self.handle_challenge(payload).map(Some),
            MSG_RESPONSE => self.handle_response(payload).map(Some),
            MSG_FINALIZE => self.handle_finalize(payload).map(|()| None),
            other => Err(ProtocolError::UnknownMessageType(other)),
        }
    }
}

impl std::fmt::Debug for MutualAuthenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MutualAuthenticator")
            .field("peer", &self.peer_label())
            .field("state", &self.state)
            .field("authenticated", &self.authenticated)
            .finish()
    }
}
