mod common;

use battleship_sessions::{
    Action, Delta, Event, FinishReason, Gateway, IllegalShotReason, InMemoryTransport, Message, RejectReason,
    RulesConfig, RulesError, ServerConfig, SessionRegistry, Side, Transport, TrustingResolver, PROTOCOL_VERSION,
};
use common::{classic_layout, fire, place, test_config};
use std::sync::Arc;
use tokio::time::{timeout, Duration};

struct Client {
    transport: InMemoryTransport,
    player: String,
    last_version: Option<u64>,
}

impl Client {
    async fn connect(gateway: &Arc<Gateway>, player: &str) -> Client {
        let (transport, server) = InMemoryTransport::pair();
        let gateway = Arc::clone(gateway);
        tokio::spawn(async move {
            let _ = gateway.serve(server).await;
        });
        let mut client = Client {
            transport,
            player: player.to_string(),
            last_version: None,
        };
        client
            .send(Message::Hello {
                version: PROTOCOL_VERSION,
                token: player.to_string(),
            })
            .await;
        assert_eq!(
            client.next().await,
            Message::Welcome {
                version: PROTOCOL_VERSION,
                player: player.to_string()
            }
        );
        client
    }

    async fn send(&mut self, msg: Message) {
        self.transport.send(msg).await.unwrap();
    }

    async fn next(&mut self) -> Message {
        timeout(Duration::from_secs(5), self.transport.recv())
            .await
            .expect("timed out waiting for a message")
            .expect("connection closed")
    }

    async fn act(&mut self, session_id: &str, action: Action) {
        let msg = Message::Action {
            session_id: session_id.to_string(),
            actor: self.player.clone(),
            action,
        };
        self.send(msg).await;
    }

    /// Next delta, checking versions arrive without gaps.
    async fn delta(&mut self) -> Delta {
        match self.next().await {
            Message::Delta(delta) => {
                if let Some(last) = self.last_version {
                    assert_eq!(delta.version, last + 1, "{} saw a version gap", self.player);
                }
                self.last_version = Some(delta.version);
                delta
            }
            other => panic!("{} expected a delta, got {:?}", self.player, other),
        }
    }

    async fn skip_to(&mut self, version: u64) -> Delta {
        loop {
            let delta = self.delta().await;
            if delta.version >= version {
                return delta;
            }
        }
    }

    async fn snapshot(&mut self) -> battleship_sessions::SessionSnapshot {
        match self.next().await {
            Message::Snapshot(snapshot) => {
                self.last_version = Some(snapshot.version);
                snapshot
            }
            other => panic!("{} expected a snapshot, got {:?}", self.player, other),
        }
    }

    async fn rejected(&mut self) -> RejectReason {
        match self.next().await {
            Message::ActionRejected { reason, .. } => reason,
            other => panic!("{} expected a rejection, got {:?}", self.player, other),
        }
    }
}

fn gateway(config: ServerConfig) -> Arc<Gateway> {
    Arc::new(Gateway::new(
        SessionRegistry::in_memory(config),
        Arc::new(TrustingResolver),
    ))
}

/// Alice hosts, Bob joins. Both have consumed the version 0 announcement.
async fn start_game(gw: &Arc<Gateway>) -> (Client, Client, String) {
    let mut alice = Client::connect(gw, "alice").await;
    let mut bob = Client::connect(gw, "bob").await;
    alice
        .send(Message::CreateSession {
            name: "friendly".into(),
            config: RulesConfig::default(),
        })
        .await;
    let info = match alice.next().await {
        Message::SessionCreated(info) => info,
        other => panic!("unexpected {:?}", other),
    };
    assert_eq!(info.host, "alice");

    bob.send(Message::ListSessions).await;
    assert_eq!(bob.next().await, Message::SessionList(vec![info.clone()]));

    bob.send(Message::JoinSession {
        session_id: info.session_id.clone(),
    })
    .await;
    let snapshot = bob.snapshot().await;
    assert_eq!(snapshot.version, 0);
    assert_eq!(snapshot.viewer, Some(Side::B));

    let started = alice.delta().await;
    assert_eq!(started.version, 0);
    assert!(matches!(started.events[..], [Event::GameStarted { .. }]));
    (alice, bob, info.session_id)
}

async fn place_all(alice: &mut Client, bob: &mut Client, id: &str) {
    for (ship, cells) in classic_layout() {
        alice.act(id, place(ship, cells.clone())).await;
        alice.delta().await;
        bob.act(id, place(ship, cells)).await;
        bob.skip_to(alice.last_version.unwrap_or(0) + 1).await;
        alice.delta().await;
    }
}

#[tokio::test]
async fn lobby_join_and_placement_redaction() {
    let gw = gateway(test_config());
    let (mut alice, mut bob, id) = start_game(&gw).await;

    bob.act(&id, place("carrier", classic_layout()[0].1.clone())).await;
    let own = bob.delta().await;
    let theirs = alice.delta().await;
    assert_eq!(own.version, 1);
    assert_eq!(theirs.version, 1);
    assert!(matches!(&own.events[0], Event::ShipPlaced { cells: Some(_), .. }));
    assert!(matches!(&theirs.events[0], Event::ShipPlaced { cells: None, .. }));

    // Rejections go to the sender only and do not consume a version.
    alice.act(&id, fire(0, 0)).await;
    assert_eq!(
        alice.rejected().await,
        RejectReason::Rules(RulesError::IllegalShot(IllegalShotReason::NotFiringPhase))
    );
    alice
        .send(Message::Action {
            session_id: id.clone(),
            actor: "bob".into(),
            action: fire(0, 0),
        })
        .await;
    assert_eq!(alice.rejected().await, RejectReason::NotAPlayer);

    alice.send(Message::Ping).await;
    assert_eq!(alice.next().await, Message::Pong);
    alice.send(Message::ListSessions).await;
    assert_eq!(alice.next().await, Message::SessionList(vec![]));
}

#[tokio::test]
async fn full_game_over_the_gateway() {
    let gw = gateway(test_config());
    let (mut alice, mut bob, id) = start_game(&gw).await;
    place_all(&mut alice, &mut bob, &id).await;
    assert_eq!(alice.last_version, Some(10));

    let targets: Vec<_> = classic_layout().into_iter().flat_map(|(_, c)| c).collect();
    let mut finished = None;
    for (i, target) in targets.iter().enumerate() {
        alice.act(&id, Action::Fire(*target)).await;
        let shot = alice.delta().await;
        bob.delta().await;
        if let Some(done) = shot.finished() {
            finished = Some(done);
            break;
        }
        let miss = battleship_sessions::Coord::new(1 + 2 * (i as u8 / 10), i as u8 % 10);
        bob.act(&id, Action::Fire(miss)).await;
        bob.delta().await;
        alice.delta().await;
    }
    assert_eq!(finished, Some((Side::A, FinishReason::FleetDestroyed)));

    // Late shots are refused.
    bob.act(&id, fire(5, 5)).await;
    assert_eq!(
        bob.rejected().await,
        RejectReason::Rules(RulesError::IllegalShot(IllegalShotReason::GameOver))
    );
}

#[tokio::test]
async fn resume_after_reconnect() {
    let gw = gateway(test_config());
    let (mut alice, bob, id) = start_game(&gw).await;
    drop(bob);

    alice.act(&id, place("destroyer", classic_layout()[4].1.clone())).await;
    alice.delta().await;

    // A fresh connection acting without a subscription still gets its delta.
    let mut bob = Client::connect(&gw, "bob").await;
    bob.act(&id, place("carrier", classic_layout()[0].1.clone())).await;
    let direct = bob.delta().await;
    assert_eq!(direct.version, 2);
    assert!(matches!(&direct.events[0], Event::ShipPlaced { cells: Some(_), .. }));
    alice.delta().await;

    bob.send(Message::Resume {
        session_id: id.clone(),
    })
    .await;
    let snapshot = bob.snapshot().await;
    assert_eq!(snapshot.version, 2);
    assert_eq!(snapshot.boards[1].fleet.len(), 1);
    assert!(snapshot.boards[0].fleet.is_empty());

    alice.act(&id, place("carrier", classic_layout()[0].1.clone())).await;
    assert_eq!(alice.delta().await.version, 3);
    assert_eq!(bob.delta().await.version, 3);
}

#[tokio::test]
async fn spectators_see_redacted_deltas() {
    let gw = gateway(test_config());
    let (mut alice, mut bob, id) = start_game(&gw).await;
    let mut carol = Client::connect(&gw, "carol").await;
    carol
        .send(Message::Watch {
            session_id: id.clone(),
        })
        .await;
    let snapshot = carol.snapshot().await;
    assert_eq!(snapshot.viewer, None);

    alice.act(&id, place("carrier", classic_layout()[0].1.clone())).await;
    alice.delta().await;
    bob.delta().await;
    let seen = carol.delta().await;
    assert!(matches!(&seen.events[0], Event::ShipPlaced { cells: None, .. }));

    carol.act(&id, fire(0, 0)).await;
    assert_eq!(carol.rejected().await, RejectReason::NotAPlayer);

    carol.send(Message::Leave).await;
    alice.act(&id, place("destroyer", classic_layout()[4].1.clone())).await;
    alice.delta().await;
    carol.send(Message::Ping).await;
    assert_eq!(carol.next().await, Message::Pong);
}

#[tokio::test]
async fn unknown_sessions_and_strangers_are_rejected() {
    let gw = gateway(test_config());
    let (_alice, _bob, id) = start_game(&gw).await;
    let mut mallory = Client::connect(&gw, "mallory").await;

    mallory
        .send(Message::JoinSession {
            session_id: "missing".into(),
        })
        .await;
    assert_eq!(mallory.rejected().await, RejectReason::SessionNotFound);

    mallory
        .send(Message::JoinSession {
            session_id: id.clone(),
        })
        .await;
    assert_eq!(mallory.rejected().await, RejectReason::SessionFull);

    mallory.send(Message::Resume { session_id: id }).await;
    assert_eq!(mallory.rejected().await, RejectReason::NotAPlayer);

    mallory.send(Message::Pong).await;
    assert!(matches!(mallory.next().await, Message::Error(_)));
}

#[tokio::test]
async fn handshake_is_enforced() {
    let gw = gateway(test_config());

    for (hello, fragment) in [
        (Message::Ping, "Expected Hello"),
        (
            Message::Hello {
                version: PROTOCOL_VERSION + 1,
                token: "alice".into(),
            },
            "version mismatch",
        ),
        (
            Message::Hello {
                version: PROTOCOL_VERSION,
                token: "  ".into(),
            },
            "empty identity",
        ),
    ] {
        let (mut client, server) = InMemoryTransport::pair();
        let task = tokio::spawn({
            let gw = Arc::clone(&gw);
            async move { gw.serve(server).await }
        });
        client.send(hello).await.unwrap();
        match client.recv().await.unwrap() {
            Message::Error(reason) => assert!(reason.contains(fragment), "{}", reason),
            other => panic!("unexpected {:?}", other),
        }
        assert!(task.await.unwrap().is_err());
    }
}

#[tokio::test(start_paused = true)]
async fn dropped_player_forfeits_after_grace() {
    let grace = Duration::from_secs(60);
    let gw = gateway(ServerConfig {
        idle_turn_grace: grace,
        ..test_config()
    });
    let (mut alice, mut bob, id) = start_game(&gw).await;
    place_all(&mut alice, &mut bob, &id).await;
    drop(bob);

    tokio::time::sleep(grace + Duration::from_secs(1)).await;
    let delta = alice.delta().await;
    assert_eq!(delta.version, 11);
    assert_eq!(delta.finished(), Some((Side::A, FinishReason::Timeout)));
    // Let the registry archive the session.
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(gw.registry().summary(&id).await.map(|s| s.winner).ok(), Some(Some(Side::A)));
}

#[tokio::test]
async fn host_leaving_the_lobby_withdraws_the_session() {
    let gw = gateway(test_config());
    let mut alice = Client::connect(&gw, "alice").await;
    alice
        .send(Message::CreateSession {
            name: "gone".into(),
            config: RulesConfig::default(),
        })
        .await;
    let info = match alice.next().await {
        Message::SessionCreated(info) => info,
        other => panic!("unexpected {:?}", other),
    };
    drop(alice);

    for _ in 0..100 {
        if gw.registry().list_open().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(gw.registry().list_open().is_empty());

    let mut bob = Client::connect(&gw, "bob").await;
    bob.send(Message::ListSessions).await;
    assert_eq!(bob.next().await, Message::SessionList(vec![]));
    bob.send(Message::JoinSession {
        session_id: info.session_id,
    })
    .await;
    assert_eq!(bob.rejected().await, RejectReason::SessionNotFound);
    assert_eq!(gw.registry().active_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn host_who_never_takes_the_seat_forfeits() {
    let grace = Duration::from_secs(60);
    let gw = gateway(ServerConfig {
        idle_turn_grace: grace,
        ..test_config()
    });
    // The session is hosted outside any connection, so seat A stays empty.
    let info = gw.registry().create("alice", "absent", RulesConfig::default());
    let mut bob = Client::connect(&gw, "bob").await;
    bob.send(Message::JoinSession {
        session_id: info.session_id.clone(),
    })
    .await;
    assert_eq!(bob.snapshot().await.version, 0);

    tokio::time::sleep(grace + Duration::from_secs(1)).await;
    let delta = bob.delta().await;
    assert_eq!(delta.version, 1);
    assert_eq!(delta.finished(), Some((Side::B, FinishReason::Timeout)));
}
