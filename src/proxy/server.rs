//! Accept loop: hands each connection to a [`ProxySession`].

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::sync::broadcast;

use super::session::{ProxyContext, ProxySession};
use crate::net::{CertificateStore, ConnectionPermit, ConnectionTracker, Listener, ListenerError};

pub struct RelayServer {
    ctx: ProxyContext,
    certificates: Option<Arc<CertificateStore>>,
    tracker: ConnectionTracker,
}

impl RelayServer {
    pub fn new(ctx: ProxyContext) -> Self {
        Self {
            ctx,
            certificates: None,
            tracker: ConnectionTracker::new(),
        }
    }

    /// Terminate TLS on accepted connections using `certificates`.
    pub fn with_tls(mut self, certificates: CertificateStore) -> Self {
        self.certificates = Some(Arc::new(certificates));
        self
    }

    pub fn tracker(&self) -> ConnectionTracker {
        self.tracker.clone()
    }

    pub fn context(&self) -> &ProxyContext {
        &self.ctx
    }

    /// Accept until `shutdown` fires. In-flight sessions keep running; wait
    /// on [`ConnectionTracker::wait_for_drain`] to let them finish.
    pub async fn run(self, listener: Listener, mut shutdown: broadcast::Receiver<()>) -> Result<(), ListenerError> {
        tracing::info!(
            address = ?listener.local_addr().ok(),
            tls = self.certificates.is_some(),
            "Relay server starting"
        );

        loop {
            let accepted = tokio::select! {
                _ = shutdown.recv() => break,
                accepted = listener.accept() => accepted,
            };
            match accepted {
                Ok((stream, peer, permit)) => self.spawn_session(stream, peer, permit),
                Err(ListenerError::Accept(e)) => {
                    // transient (e.g. EMFILE); keep accepting
                    tracing::warn!(error = %e, "Accept failed");
                }
                Err(e) => return Err(e),
            }
        }

        tracing::info!(active = self.tracker.active_count(), "Relay server stopped accepting");
        Ok(())
    }

    fn spawn_session(&self, stream: TcpStream, peer: SocketAddr, permit: ConnectionPermit) {
        let ctx = self.ctx.clone();
        let certificates = self.certificates.clone();
        let guard = self.tracker.track();

        tokio::spawn(async move {
            let _permit = permit;
            let _guard = guard;
            // sessions log their own outcome
            match certificates {
                Some(store) => {
                    let limit = Duration::from_secs(ctx.config.load().timeouts.head_secs);
                    match store.accept_within(stream, limit).await {
                        Ok((tls, _hello)) => {
                            let _ = ProxySession::new(&ctx, tls, peer, true).run().await;
                        }
                        Err(e) => tracing::debug!(peer = %peer, error = %e, "TLS connection refused"),
                    }
                }
                None => {
                    let _ = ProxySession::new(&ctx, stream, peer, false).run().await;
                }
            }
        });
    }
}
