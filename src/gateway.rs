//! Per-connection protocol loop between a transport and the registry.

use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::bus::{Subscription, SubscriptionError};
use crate::common::{PlayerId, SessionId, Side};
use crate::delta::Delta;
use crate::error::{RejectReason, SessionError};
use crate::identity::IdentityResolver;
use crate::protocol::{Message, PROTOCOL_VERSION};
use crate::registry::SessionRegistry;
use crate::session::SessionHandle;
use crate::transport::tcp::TcpTransport;
use crate::transport::Transport;

/// Write timeout for TCP connections accepted by [`Gateway::listen`].
const WRITE_TIMEOUT: Duration = Duration::from_secs(30);

/// The session a connection currently follows.
struct Binding {
    session_id: SessionId,
    /// `None` while a host waits for a guest.
    handle: Option<Arc<SessionHandle>>,
    /// `None` for spectators.
    side: Option<Side>,
    subscription: Subscription,
    /// Version of the last snapshot sent. Older deltas are dropped.
    baseline: Option<u64>,
}

struct Connection {
    player: PlayerId,
    binding: Option<Binding>,
}

enum Incoming {
    Client(anyhow::Result<Message>),
    Bus(Result<Delta, SubscriptionError>),
}

pub struct Gateway {
    registry: SessionRegistry,
    identity: Arc<dyn IdentityResolver>,
}

impl Gateway {
    pub fn new(registry: SessionRegistry, identity: Arc<dyn IdentityResolver>) -> Self {
        Self { registry, identity }
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// Accept TCP connections until `shutdown` fires.
    pub async fn listen(self: Arc<Self>, listener: TcpListener, shutdown: CancellationToken) -> anyhow::Result<()> {
        let max_frame = self.registry.config().max_frame_size;
        loop {
            let (stream, addr) = tokio::select! {
                _ = shutdown.cancelled() => return Ok(()),
                accepted = listener.accept() => accepted?,
            };
            log::debug!("connection from {}", addr);
            let gateway = Arc::clone(&self);
            tokio::spawn(async move {
                let transport = TcpTransport::with_config(stream, WRITE_TIMEOUT, max_frame);
                if let Err(e) = gateway.serve(transport).await {
                    log::debug!("connection {} ended: {}", addr, e);
                }
            });
        }
    }

    /// Drive one connection to completion. The subscription is released and
    /// the player's presence dropped however the connection ends.
    pub async fn serve<T: Transport>(&self, mut transport: T) -> anyhow::Result<()> {
        let player = self.handshake(&mut transport).await?;
        let mut conn = Connection {
            player,
            binding: None,
        };
        let result = self.run(&mut conn, &mut transport).await;
        self.unbind(&mut conn).await;
        result
    }

    async fn handshake<T: Transport>(&self, transport: &mut T) -> anyhow::Result<PlayerId> {
        match transport.recv().await? {
            Message::Hello { version, token } if version == PROTOCOL_VERSION => {
                let player = match self.identity.resolve(&token).await {
                    Ok(player) => player,
                    Err(e) => {
                        transport.send(Message::Error(e.to_string())).await?;
                        return Err(e);
                    }
                };
                transport
                    .send(Message::Welcome {
                        version: PROTOCOL_VERSION,
                        player: player.clone(),
                    })
                    .await?;
                Ok(player)
            }
            Message::Hello { version, .. } => {
                let reason = format!(
                    "Protocol version mismatch: expected {}, got {}",
                    PROTOCOL_VERSION, version
                );
                transport.send(Message::Error(reason.clone())).await?;
                Err(anyhow::anyhow!(reason))
            }
            _ => {
                transport.send(Message::Error("Expected Hello".into())).await?;
                Err(anyhow::anyhow!("Expected Hello"))
            }
        }
    }

    async fn run<T: Transport>(&self, conn: &mut Connection, transport: &mut T) -> anyhow::Result<()> {
        loop {
            let incoming = match conn.binding.as_mut() {
                Some(binding) => tokio::select! {
                    msg = transport.recv() => Incoming::Client(msg),
                    delta = binding.subscription.recv() => Incoming::Bus(delta),
                },
                None => Incoming::Client(transport.recv().await),
            };
            match incoming {
                Incoming::Client(Ok(msg)) => self.handle_message(conn, transport, msg).await?,
                // Transport gone: a normal disconnect.
                Incoming::Client(Err(e)) => {
                    log::debug!("player {} disconnected: {}", conn.player, e);
                    return Ok(());
                }
                Incoming::Bus(delta) => self.forward(conn, transport, delta).await?,
            }
        }
    }

    async fn forward<T: Transport>(
        &self,
        conn: &mut Connection,
        transport: &mut T,
        delta: Result<Delta, SubscriptionError>,
    ) -> anyhow::Result<()> {
        let Some(binding) = conn.binding.as_mut() else {
            return Ok(());
        };
        match delta {
            Ok(delta) => {
                if binding.baseline.is_some_and(|v| delta.version <= v) {
                    return Ok(());
                }
                binding.baseline = Some(delta.version);
                if binding.handle.is_none() {
                    // The guest arrived; the host now has a live session.
                    if let Ok(handle) = self.registry.get(&binding.session_id).await {
                        if let Some(side) = binding.side {
                            handle.attach(side).await;
                        }
                        binding.handle = Some(handle);
                    }
                }
                transport.send(Message::Delta(delta.view_for(binding.side))).await
            }
            Err(SubscriptionError::Lagged(missed)) => {
                log::warn!(
                    "player {} lagged {} deltas on session {}, resending snapshot",
                    conn.player,
                    missed,
                    binding.session_id
                );
                let Some(handle) = binding.handle.clone() else {
                    return Ok(());
                };
                let snapshot = match binding.side {
                    Some(_) => match handle.resume(&conn.player).await {
                        Ok(snapshot) => snapshot,
                        Err(e) => return self.reject(transport, Some(binding.session_id.clone()), &e).await,
                    },
                    None => handle.spectate().await,
                };
                binding.baseline = Some(snapshot.version);
                transport.send(Message::Snapshot(snapshot)).await
            }
            Err(SubscriptionError::Closed) => {
                log::debug!("session {} topic closed", binding.session_id);
                self.unbind(conn).await;
                Ok(())
            }
        }
    }

    async fn handle_message<T: Transport>(
        &self,
        conn: &mut Connection,
        transport: &mut T,
        msg: Message,
    ) -> anyhow::Result<()> {
        match msg {
            Message::Ping => transport.send(Message::Pong).await,
            Message::ListSessions => {
                transport
                    .send(Message::SessionList(self.registry.list_open()))
                    .await
            }
            Message::CreateSession { name, config } => {
                self.unbind(conn).await;
                let info = self.registry.create(&conn.player, &name, config);
                let subscription = match self.registry.bus().subscribe(&info.session_id).await {
                    Ok(subscription) => subscription,
                    Err(e) => {
                        let reason = RejectReason::Unavailable(e.to_string());
                        return transport
                            .send(Message::ActionRejected {
                                session_id: Some(info.session_id),
                                reason,
                            })
                            .await;
                    }
                };
                conn.binding = Some(Binding {
                    session_id: info.session_id.clone(),
                    handle: None,
                    side: Some(Side::A),
                    subscription,
                    baseline: None,
                });
                transport.send(Message::SessionCreated(info)).await
            }
            Message::JoinSession { session_id } => match self.registry.join(&session_id, &conn.player).await {
                Ok(handle) => self.bind(conn, transport, handle, Some(Side::B)).await,
                Err(e) => self.reject(transport, Some(session_id), &e).await,
            },
            Message::Resume { session_id } => {
                let handle = match self.registry.get(&session_id).await {
                    Ok(handle) => handle,
                    Err(e) => return self.reject(transport, Some(session_id), &e).await,
                };
                match handle.side_of(&conn.player) {
                    Some(side) => self.bind(conn, transport, handle, Some(side)).await,
                    None => {
                        let e = SessionError::NotAPlayer(conn.player.clone());
                        self.reject(transport, Some(session_id), &e).await
                    }
                }
            }
            Message::Watch { session_id } => match self.registry.get(&session_id).await {
                Ok(handle) => self.bind(conn, transport, handle, None).await,
                Err(e) => self.reject(transport, Some(session_id), &e).await,
            },
            Message::Leave => {
                self.unbind(conn).await;
                Ok(())
            }
            Message::Action {
                session_id,
                actor,
                action,
            } => {
                if actor != conn.player {
                    let e = SessionError::NotAPlayer(actor);
                    return self.reject(transport, Some(session_id), &e).await;
                }
                let handle = match self.registry.get(&session_id).await {
                    Ok(handle) => handle,
                    Err(e) => return self.reject(transport, Some(session_id), &e).await,
                };
                match handle.submit_action(&conn.player, action).await {
                    Ok(accepted) => {
                        let subscribed = conn
                            .binding
                            .as_ref()
                            .is_some_and(|b| b.session_id == session_id);
                        if subscribed {
                            // The delta reaches this connection through its
                            // subscription like everyone else's.
                            Ok(())
                        } else {
                            let side = handle.side_of(&conn.player);
                            transport
                                .send(Message::Delta(accepted.delta.view_for(side)))
                                .await
                        }
                    }
                    Err(e) => self.reject(transport, Some(session_id), &e).await,
                }
            }
            Message::Hello { .. } => transport.send(Message::Error("Already greeted".into())).await,
            other => {
                log::debug!("player {} sent server-only message {:?}", conn.player, other);
                transport
                    .send(Message::Error("Unexpected message".into()))
                    .await
            }
        }
    }

    /// Subscribe first, then snapshot, so no delta falls between the two.
    async fn bind<T: Transport>(
        &self,
        conn: &mut Connection,
        transport: &mut T,
        handle: Arc<SessionHandle>,
        side: Option<Side>,
    ) -> anyhow::Result<()> {
        self.unbind(conn).await;
        let session_id = handle.id().clone();
        let subscription = match handle.subscribe().await {
            Ok(subscription) => subscription,
            Err(e) => return self.reject(transport, Some(session_id), &e).await,
        };
        let snapshot = match side {
            Some(_) => match handle.resume(&conn.player).await {
                Ok(snapshot) => snapshot,
                Err(e) => return self.reject(transport, Some(session_id), &e).await,
            },
            None => handle.spectate().await,
        };
        if let Some(side) = side {
            handle.attach(side).await;
        }
        conn.binding = Some(Binding {
            session_id,
            handle: Some(handle),
            side,
            subscription,
            baseline: Some(snapshot.version),
        });
        transport.send(Message::Snapshot(snapshot)).await
    }

    async fn unbind(&self, conn: &mut Connection) {
        let Some(binding) = conn.binding.take() else {
            return;
        };
        match (binding.handle, binding.side) {
            (Some(handle), Some(side)) => handle.detach(side).await,
            // A host leaving before anyone joined takes the session along.
            // If a guest got in first, the grace clock armed at launch
            // covers the host's empty seat.
            (None, Some(_)) => {
                self.registry.withdraw(&binding.session_id, &conn.player).await;
            }
            _ => {}
        }
    }

    async fn reject<T: Transport>(
        &self,
        transport: &mut T,
        session_id: Option<SessionId>,
        err: &SessionError,
    ) -> anyhow::Result<()> {
        log::debug!("rejected: {}", err);
        transport
            .send(Message::ActionRejected {
                session_id,
                reason: RejectReason::from(err),
            })
            .await
    }
}
