//! Peer connections: handshake, then content sync.

use std::io;
use std::net::SocketAddr;
use std::pin::pin;
use std::sync::Arc;

use futures::{stream, Stream, StreamExt};
use silo_crypto::Keypair;
use silo_protocol::{read_frame, write_frame, AuthConfig, PeerSession};
use silo_store::ContentStore;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::error::{ServerError, ServerResult};

/// Accept peers, serving at most `max_connections` at once. Failed
/// accepts are logged and skipped.
pub async fn serve_peers(
    listener: TcpListener,
    keypair: Arc<Keypair>,
    store: ContentStore,
    max_connections: usize,
) -> ServerResult<()> {
    let incoming = stream::unfold(listener, |listener| async move {
        let accepted = listener.accept().await;
        Some((accepted, listener))
    });
    serve_connections(incoming, keypair, store, max_connections).await
}

/// Serve every connection `incoming` yields until it ends.
async fn serve_connections<S, I>(
    incoming: I,
    keypair: Arc<Keypair>,
    store: ContentStore,
    max_connections: usize,
) -> ServerResult<()>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
    I: Stream<Item = io::Result<(S, SocketAddr)>>,
{
    let limit = Arc::new(Semaphore::new(max_connections.max(1)));
    let mut incoming = pin!(incoming);
    loop {
        let permit = limit
            .clone()
            .acquire_owned()
            .await
            .map_err(|e| ServerError::Internal(e.to_string()))?;
        let (stream, addr) = match incoming.next().await {
            Some(Ok(accepted)) => accepted,
            Some(Err(err)) => {
                warn!(error = %err, "failed to accept peer connection");
                continue;
            }
            None => return Ok(()),
        };
        let keypair = keypair.clone();
        let store = store.clone();
        tokio::spawn(async move {
            let _permit = permit;
            if let Err(err) = handle_peer(stream, addr, keypair, store).await {
                warn!(%addr, error = %err, "peer connection closed with error");
            }
        });
    }
}

/// Serve one peer. The peer opens the handshake; content ids it
/// announces afterwards are pinned in the background.
pub async fn handle_peer<S>(
    stream: S,
    addr: SocketAddr,
    keypair: Arc<Keypair>,
    store: ContentStore,
) -> ServerResult<()>
where
    S: AsyncRead + AsyncWrite,
{
    let (mut reader, mut writer) = tokio::io::split(stream);
    let mut session = PeerSession::new(keypair, None, AuthConfig::default())?;
    debug!(%addr, "peer connected");

    while let Some(msg) = read_frame(&mut reader).await? {
        let was_authenticated = session.is_authenticated();
        if let Some(reply) = session.consume(msg.message_type, &msg.payload)? {
            write_frame(&mut writer, &reply).await?;
        }
        if !was_authenticated && session.is_authenticated() {
            info!(%addr, peer = ?session.peer().map(|p| p.short()), "peer authenticated");
        }
        for id in session.take_sync_requests() {
            let store = store.clone();
            tokio::spawn(async move {
                match store.synchronize(&id).await {
                    Ok(()) => debug!(content_id = %id, "synchronized"),
                    Err(err) => warn!(content_id = %id, error = %err, "synchronize failed"),
                }
            });
        }
    }
    debug!(%addr, "peer disconnected");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use silo_store::InMemoryBackend;
    use silo_types::ContentId;
    use std::time::Duration;

    fn addr() -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], 9))
    }

    #[tokio::test]
    async fn announced_content_gets_pinned() {
        let backend = Arc::new(InMemoryBackend::new());
        let backend_id = backend.insert(&b"replicated asset"[..]);
        let store = ContentStore::new(backend.clone());
        let node_key = Arc::new(Keypair::generate());

        let (client, server) = tokio::io::duplex(4096);
        let node = tokio::spawn(handle_peer(server, addr(), node_key.clone(), store));

        let (mut rd, mut wr) = tokio::io::split(client);
        let mut peer = PeerSession::new(
            Arc::new(Keypair::generate()),
            Some(node_key.public_key()),
            AuthConfig::default(),
        )
        .unwrap();

        let challenge = peer.initiate().unwrap();
        write_frame(&mut wr, &challenge).await.unwrap();
        let response = read_frame(&mut rd).await.unwrap().unwrap();
        let finalize = peer.consume(response.message_type, &response.payload).unwrap().unwrap();
        write_frame(&mut wr, &finalize).await.unwrap();
        assert!(peer.is_authenticated());

        let ids = vec![ContentId::new(backend_id.to_hex()).unwrap()];
        write_frame(&mut wr, &peer.announce(&ids).unwrap()).await.unwrap();
        let ack = read_frame(&mut rd).await.unwrap().unwrap();
        peer.consume(ack.message_type, &ack.payload).unwrap();
        assert_eq!(peer.acknowledged(), 1);

        for _ in 0..100 {
            if backend.is_pinned(&backend_id) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(backend.is_pinned(&backend_id));

        drop(wr);
        drop(rd);
        node.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn accept_errors_do_not_stop_listener() {
        let store = ContentStore::new(Arc::new(InMemoryBackend::new()));
        let node_key = Arc::new(Keypair::generate());
        let (client, server) = tokio::io::duplex(4096);
        let incoming = stream::iter(vec![
            Err(io::Error::from(io::ErrorKind::ConnectionAborted)),
            Err(io::Error::other("too many open files")),
            Ok((server, addr())),
        ]);
        serve_connections(incoming, node_key.clone(), store, 4).await.unwrap();

        let (mut rd, mut wr) = tokio::io::split(client);
        let mut peer = PeerSession::new(
            Arc::new(Keypair::generate()),
            Some(node_key.public_key()),
            AuthConfig::default(),
        )
        .unwrap();
        write_frame(&mut wr, &peer.initiate().unwrap()).await.unwrap();
        let response = read_frame(&mut rd).await.unwrap().unwrap();
        assert!(peer.consume(response.message_type, &response.payload).unwrap().is_some());
        assert!(peer.is_authenticated());
    }

    #[tokio::test]
    async fn sync_before_handshake_ends_connection() {
        let store = ContentStore::new(Arc::new(InMemoryBackend::new()));
        let (client, server) = tokio::io::duplex(4096);
        let node = tokio::spawn(handle_peer(server, addr(), Arc::new(Keypair::generate()), store));

        let (_rd, mut wr) = tokio::io::split(client);
        let announce = silo_protocol::Message::new(silo_protocol::SYNC_OFFSET, vec![0, 0]);
        write_frame(&mut wr, &announce).await.unwrap();

        let err = node.await.unwrap().unwrap_err();
        assert!(matches!(err, ServerError::Protocol(silo_protocol::ProtocolError::NotAuthenticated)));
    }
}
