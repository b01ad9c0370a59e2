//! Session bridge tests over in-memory connections: fan-out ordering,
//! grace-period vacancy, restart recovery, and replay.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use turnhall::prelude::*;
use turnhall_session::SessionManager;

type Bridge = Arc<SessionBridge<DevAuthenticator, JsonCodec>>;

fn bridge_over(store: Arc<dyn TableStore>, grace_secs: u64) -> Bridge {
    let registry = Arc::new(TableRegistry::new(RegistryConfig::default(), store));
    let sessions = SessionManager::new(SessionConfig {
        reconnect_grace_secs: grace_secs,
        ..SessionConfig::default()
    });
    Arc::new(SessionBridge::new(registry, sessions, DevAuthenticator, JsonCodec))
}

fn bridge(grace_secs: u64) -> Bridge {
    bridge_over(Arc::new(MemoryTableStore::new()), grace_secs)
}

/// The client end of an in-memory connection served by a bridge.
struct Client {
    conn: MemoryConnection,
    served: JoinHandle<Result<(), TurnhallError>>,
}

impl Client {
    async fn connect(bridge: &Bridge, user: u64) -> (Self, ServerFrame) {
        let (client_end, server_end) = memory_pair();
        let served = tokio::spawn(Arc::clone(bridge).serve(server_end));
        let client = Self {
            conn: client_end,
            served,
        };
        client
            .send(ClientFrame::Handshake {
                version: PROTOCOL_VERSION,
                token: Some(user.to_string()),
            })
            .await;
        let ack = client.recv().await;
        assert!(matches!(ack, ServerFrame::HandshakeAck { .. }), "{ack:?}");
        (client, ack)
    }

    async fn send(&self, frame: ClientFrame) {
        let envelope = Envelope {
            seq: 0,
            timestamp: 0,
            payload: frame,
        };
        let bytes = JsonCodec.encode(&envelope).expect("encode");
        self.conn.send(&bytes).await.expect("send");
    }

    async fn recv(&self) -> ServerFrame {
        let bytes = tokio::time::timeout(Duration::from_secs(2), self.conn.recv())
            .await
            .expect("timed out waiting for a frame")
            .expect("recv")
            .expect("connection closed");
        let envelope: Envelope<ServerFrame> = JsonCodec.decode(&bytes).expect("decode");
        envelope.payload
    }

    async fn recv_until(&self, want: impl Fn(&ServerFrame) -> bool) -> ServerFrame {
        loop {
            let frame = self.recv().await;
            if want(&frame) {
                return frame;
            }
        }
    }

    async fn action(&self, table_id: TableId, kind: &str, payload: serde_json::Value) -> ServerFrame {
        self.send(ClientFrame::Action {
            table_id,
            kind: kind.to_string(),
            payload,
        })
        .await;
        self.recv_until(|f| matches!(f, ServerFrame::Committed { .. } | ServerFrame::Error { .. }))
            .await
    }

    /// Closes the client end and waits for the server to release the
    /// session.
    async fn close(self) {
        self.conn.close().await.expect("close");
        let _ = self.served.await.expect("serve task");
    }
}

fn error_code(frame: &ServerFrame) -> Option<u16> {
    match frame {
        ServerFrame::Error { code, .. } => Some(*code),
        _ => None,
    }
}

/// Users 1 and 2 seated at a started table, driven directly through the
/// registry and then connected.
async fn started_table(bridge: &Bridge) -> (Client, Client, TableId) {
    let registry = bridge.registry();
    let table_id = registry
        .create(
            UserId(1),
            TableOptions {
                seed: Some(3),
                ..TableOptions::default()
            },
        )
        .expect("create");
    registry.join(table_id, UserId(2)).expect("join");
    registry.set_ready(table_id, UserId(1), true).expect("ready");
    registry.set_ready(table_id, UserId(2), true).expect("ready");
    registry.start(table_id, UserId(1)).expect("start");

    // Seated users are rebound on handshake.
    let (alice, ack) = Client::connect(bridge, 1).await;
    assert!(matches!(ack, ServerFrame::HandshakeAck { ref resumed, .. } if resumed == &vec![table_id]));
    let (bob, _) = Client::connect(bridge, 2).await;
    alice.recv_until(|f| matches!(f, ServerFrame::Snapshot { .. })).await;
    bob.recv_until(|f| matches!(f, ServerFrame::Snapshot { .. })).await;
    (alice, bob, table_id)
}

fn delta_seq(frame: &ServerFrame) -> Option<u64> {
    match frame {
        ServerFrame::Delta { delta } => Some(delta.action.seq),
        _ => None,
    }
}

// =========================================================================
// Lobby flow
// =========================================================================

#[tokio::test]
async fn test_create_join_start_over_frames() {
    let bridge = bridge(3600);
    let (alice, _) = Client::connect(&bridge, 1).await;
    let (bob, _) = Client::connect(&bridge, 2).await;

    alice
        .send(ClientFrame::CreateTable {
            options: TableOptions::default(),
        })
        .await;
    let table_id = match alice.recv().await {
        ServerFrame::TableCreated { table_id } => table_id,
        other => panic!("expected TableCreated, got {other:?}"),
    };
    match alice.recv().await {
        ServerFrame::Snapshot { table } => {
            assert_eq!(table.status, TableStatus::Lobby);
            assert_eq!(table.owner, UserId(1));
        }
        other => panic!("expected Snapshot, got {other:?}"),
    }

    bob.send(ClientFrame::JoinTable { table_id }).await;
    assert_eq!(
        bob.recv().await,
        ServerFrame::Joined {
            table_id,
            role: JoinRole::Seated { seat: 1 }
        }
    );

    // Starting before anyone is ready is refused.
    alice.send(ClientFrame::StartTable { table_id }).await;
    let refused = alice.recv_until(|f| error_code(f).is_some()).await;
    assert_eq!(error_code(&refused), Some(409));

    alice.send(ClientFrame::SetReady { table_id, ready: true }).await;
    bob.send(ClientFrame::SetReady { table_id, ready: true }).await;
    alice
        .recv_until(|f| matches!(f, ServerFrame::Snapshot { table } if table.seats.iter().all(|s| s.ready)))
        .await;

    // Only the owner may start.
    bob.send(ClientFrame::StartTable { table_id }).await;
    let refused = bob.recv_until(|f| error_code(f).is_some()).await;
    assert_eq!(error_code(&refused), Some(403));

    alice.send(ClientFrame::StartTable { table_id }).await;
    bob.recv_until(|f| matches!(f, ServerFrame::Snapshot { table } if table.status == TableStatus::Ongoing))
        .await;
}

#[tokio::test]
async fn test_leaving_last_lobby_seat_removes_table() {
    let bridge = bridge(3600);
    let (alice, _) = Client::connect(&bridge, 1).await;

    alice
        .send(ClientFrame::CreateTable {
            options: TableOptions::default(),
        })
        .await;
    let table_id = match alice.recv().await {
        ServerFrame::TableCreated { table_id } => table_id,
        other => panic!("expected TableCreated, got {other:?}"),
    };

    alice.send(ClientFrame::LeaveTable { table_id }).await;
    alice
        .recv_until(|f| matches!(f, ServerFrame::Left { .. }))
        .await;

    alice.send(ClientFrame::ListTables).await;
    assert_eq!(alice.recv().await, ServerFrame::TableList { tables: vec![] });
    assert_eq!(bridge.registry().seated_table(UserId(1)), None);
}

#[tokio::test]
async fn test_spectator_cannot_act() {
    let bridge = bridge(3600);
    let (_alice, _bob, table_id) = started_table(&bridge).await;
    let (carol, _) = Client::connect(&bridge, 3).await;

    carol.send(ClientFrame::Spectate { table_id }).await;
    assert_eq!(
        carol.recv().await,
        ServerFrame::Joined {
            table_id,
            role: JoinRole::Spectator
        }
    );

    let reply = carol
        .action(table_id, "note", serde_json::json!({ "text": "hello" }))
        .await;
    assert_eq!(error_code(&reply), Some(403));
}

// =========================================================================
// Fan-out ordering
// =========================================================================

#[tokio::test]
async fn test_observers_see_commit_order() {
    let bridge = bridge(3600);
    let (alice, bob, table_id) = started_table(&bridge).await;
    let (carol, _) = Client::connect(&bridge, 3).await;
    carol.send(ClientFrame::Spectate { table_id }).await;
    carol.recv_until(|f| matches!(f, ServerFrame::Snapshot { .. })).await;

    const PER_PLAYER: usize = 20;
    let alice_notes = tokio::spawn(async move {
        for i in 0..PER_PLAYER {
            let reply = alice
                .action(table_id, "note", serde_json::json!({ "text": format!("a{i}") }))
                .await;
            assert!(matches!(reply, ServerFrame::Committed { .. }), "{reply:?}");
        }
        alice
    });
    let bob_notes = tokio::spawn(async move {
        for i in 0..PER_PLAYER {
            let reply = bob
                .action(table_id, "note", serde_json::json!({ "text": format!("b{i}") }))
                .await;
            assert!(matches!(reply, ServerFrame::Committed { .. }), "{reply:?}");
        }
        bob
    });

    let mut seen = Vec::new();
    while seen.len() < 2 * PER_PLAYER {
        if let Some(seq) = delta_seq(&carol.recv().await) {
            seen.push(seq);
        }
    }
    let expected: Vec<u64> = (1..=(2 * PER_PLAYER) as u64).collect();
    assert_eq!(seen, expected, "deltas arrive gapless and in commit order");

    alice_notes.await.expect("alice");
    bob_notes.await.expect("bob");
}

// =========================================================================
// Grace period
// =========================================================================

#[tokio::test]
async fn test_expired_seat_is_vacated_then_reclaimed() {
    let bridge = bridge(0);
    let (alice, bob, table_id) = started_table(&bridge).await;

    alice.close().await;
    assert_eq!(bridge.sweep().await, 1);

    let vacated = bob
        .recv_until(|f| matches!(f, ServerFrame::Delta { .. }))
        .await;
    match vacated {
        ServerFrame::Delta { delta } => {
            assert_eq!(delta.action.body, ActionBody::Vacate);
            assert_eq!(delta.action.actor, UserId(1));
            assert_eq!(delta.current_turn, Some(1), "turn passed to bob");
        }
        _ => unreachable!(),
    }

    // The seat is still hers; coming back reclaims it.
    let (alice, ack) = Client::connect(&bridge, 1).await;
    assert!(matches!(ack, ServerFrame::HandshakeAck { ref resumed, .. } if resumed == &vec![table_id]));
    let reclaimed = bob
        .recv_until(|f| matches!(f, ServerFrame::Delta { .. }))
        .await;
    match reclaimed {
        ServerFrame::Delta { delta } => {
            assert_eq!(delta.action.body, ActionBody::Reclaim);
            assert_eq!(delta.action.seq, 2);
        }
        _ => unreachable!(),
    }

    // Bob's turn now; after him it comes back around to alice.
    let reply = bob.action(table_id, "play", serde_json::json!({ "slot": 0 })).await;
    assert!(matches!(reply, ServerFrame::Committed { seq: 3, .. }), "{reply:?}");
    let reply = alice.action(table_id, "play", serde_json::json!({ "slot": 0 })).await;
    assert!(matches!(reply, ServerFrame::Committed { seq: 4, .. }), "{reply:?}");
}

#[tokio::test]
async fn test_reconnect_within_grace_keeps_seat_present() {
    let bridge = bridge(3600);
    let (alice, bob, table_id) = started_table(&bridge).await;

    alice.close().await;
    assert_eq!(bridge.sweep().await, 0);

    let (alice, _) = Client::connect(&bridge, 1).await;
    match alice.recv().await {
        ServerFrame::Snapshot { table } => {
            assert!(table.seats[0].present);
            assert_eq!(table.log_len, 0);
        }
        other => panic!("expected Snapshot, got {other:?}"),
    }

    let reply = alice.action(table_id, "play", serde_json::json!({ "slot": 0 })).await;
    assert!(matches!(reply, ServerFrame::Committed { seq: 1, .. }), "{reply:?}");
    drop(bob);
}

// =========================================================================
// Restart recovery
// =========================================================================

#[tokio::test]
async fn test_players_rebind_after_restart() {
    let store: Arc<dyn TableStore> = Arc::new(MemoryTableStore::new());
    let table_id = {
        let before = bridge_over(Arc::clone(&store), 3600);
        let (alice, _bob, table_id) = started_table(&before).await;
        let reply = alice.action(table_id, "play", serde_json::json!({ "slot": 0 })).await;
        assert!(matches!(reply, ServerFrame::Committed { seq: 1, .. }));
        table_id
    };

    let after = bridge_over(store, 3600);
    let report = after.registry().recover().expect("recover");
    assert_eq!(report.restored, vec![table_id]);
    assert_eq!(after.adopt_recovered(&report).await, 2);

    let (bob, ack) = Client::connect(&after, 2).await;
    assert!(matches!(ack, ServerFrame::HandshakeAck { ref resumed, .. } if resumed == &vec![table_id]));
    match bob.recv().await {
        ServerFrame::Snapshot { table } => {
            assert_eq!(table.status, TableStatus::Ongoing);
            assert_eq!(table.log_len, 1);
            assert_eq!(table.current_turn, Some(1));
        }
        other => panic!("expected Snapshot, got {other:?}"),
    }

    let reply = bob.action(table_id, "discard", serde_json::json!({ "slot": 0 })).await;
    // Clues are full until someone spends one, so the discard is illegal.
    assert_eq!(error_code(&reply), Some(400));
    let reply = bob.action(table_id, "play", serde_json::json!({ "slot": 0 })).await;
    assert!(matches!(reply, ServerFrame::Committed { seq: 2, .. }), "{reply:?}");
}

// =========================================================================
// Replay
// =========================================================================

#[tokio::test]
async fn test_replay_navigation() {
    let bridge = bridge(3600);
    let (alice, _bob, table_id) = started_table(&bridge).await;
    for text in ["one", "two", "three"] {
        let reply = alice.action(table_id, "note", serde_json::json!({ "text": text })).await;
        assert!(matches!(reply, ServerFrame::Committed { .. }));
    }

    alice.send(ClientFrame::ReplaySeek { table_id, index: 0 }).await;
    match alice.recv_until(|f| matches!(f, ServerFrame::Replay { .. })).await {
        ServerFrame::Replay { frame } => {
            assert_eq!(frame.index, 0);
            assert_eq!(frame.total, 3);
            assert!(frame.action.is_none());
        }
        _ => unreachable!(),
    }

    alice.send(ClientFrame::ReplayStep { table_id, delta: 2 }).await;
    match alice.recv_until(|f| matches!(f, ServerFrame::Replay { .. })).await {
        ServerFrame::Replay { frame } => {
            assert_eq!(frame.index, 2);
            assert_eq!(frame.action.map(|a| a.seq), Some(2));
        }
        _ => unreachable!(),
    }

    alice.send(ClientFrame::ReplaySeek { table_id, index: 9 }).await;
    let refused = alice.recv_until(|f| error_code(f).is_some()).await;
    assert_eq!(error_code(&refused), Some(416));

    // The failed seek left the cursor where it was.
    alice.send(ClientFrame::ReplayStep { table_id, delta: -1 }).await;
    match alice.recv_until(|f| matches!(f, ServerFrame::Replay { .. })).await {
        ServerFrame::Replay { frame } => assert_eq!(frame.index, 1),
        _ => unreachable!(),
    }
}

// =========================================================================
// Terminal tables
// =========================================================================

#[tokio::test]
async fn test_terminate_reaches_every_observer() {
    let bridge = bridge(3600);
    let (alice, bob, table_id) = started_table(&bridge).await;

    let reply = alice.action(table_id, "terminate", serde_json::Value::Null).await;
    assert!(matches!(reply, ServerFrame::Committed { seq: 1, .. }), "{reply:?}");

    match bob.recv_until(|f| matches!(f, ServerFrame::Delta { .. })).await {
        ServerFrame::Delta { delta } => assert_eq!(delta.status, TableStatus::Aborted),
        _ => unreachable!(),
    }
    assert_eq!(bridge.registry().seated_table(UserId(2)), None);

    let reply = bob.action(table_id, "note", serde_json::json!({ "text": "late" })).await;
    assert_eq!(error_code(&reply), Some(409));

    // Once every observer is gone, the table is removed.
    alice.close().await;
    bob.close().await;
    assert!(bridge.registry().get(table_id).is_err());
}
