//! Message client and session manager against a loopback WebSocket server.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::time::{sleep, timeout};
use tokio_tungstenite::tungstenite::Message as WsMessage;

use agentcp::{MessageClient, MessageClientConfig, SessionManager};

/// Envelopes the mock server has received, in arrival order.
type Received = Arc<Mutex<Vec<Value>>>;

/// Accept loop that answers `create_session_req` and records everything.
/// `drop_first` closes the first connection right after it opens, to
/// exercise the reconnect path.
async fn spawn_server(drop_first: bool) -> (String, Received) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let received: Received = Arc::new(Mutex::new(Vec::new()));

    let log = received.clone();
    tokio::spawn(async move {
        let mut first = true;
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                break;
            };
            let Ok(mut ws) = tokio_tungstenite::accept_async(stream).await else {
                continue;
            };
            if drop_first && first {
                first = false;
                let _ = ws.close(None).await;
                continue;
            }
            let log = log.clone();
            tokio::spawn(async move {
                while let Some(Ok(frame)) = ws.next().await {
                    let WsMessage::Text(text) = frame else { continue };
                    let Ok(env) = serde_json::from_str::<Value>(&text) else {
                        continue;
                    };
                    log.lock().unwrap().push(env.clone());
                    if env["cmd"] == "create_session_req" {
                        let ack = json!({
                            "cmd": "create_session_ack",
                            "data": {
                                "request_id": env["data"]["request_id"],
                                "session_id": "srv-sess-1",
                                "status_code": "200",
                            },
                        });
                        if ws.send(WsMessage::text(ack.to_string())).await.is_err() {
                            break;
                        }
                    }
                }
            });
        }
    });

    (format!("http://{addr}"), received)
}

fn client_for(url: &str) -> MessageClient {
    MessageClient::new(
        "alice.aid.net",
        url,
        Arc::new(|| "test-signature".to_string()),
        MessageClientConfig::default(),
    )
}

async fn wait_until(mut cond: impl FnMut() -> bool) {
    timeout(Duration::from_secs(5), async {
        while !cond() {
            sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

#[tokio::test]
async fn ack_correlation_over_the_wire() {
    let (url, _received) = spawn_server(false).await;
    let client = client_for(&url);
    client.connect().await.unwrap();

    let env = json!({
        "cmd": "create_session_req",
        "data": {"request_id": "req-1", "type": "public"},
    });
    let ack = client
        .send_and_wait_ack(
            env.to_string(),
            "create_session_ack",
            "req-1",
            Duration::from_secs(5),
        )
        .await
        .unwrap();
    assert_eq!(ack["session_id"], "srv-sess-1");
    client.disconnect();
}

#[tokio::test]
async fn queued_messages_flush_in_order_on_connect() {
    let (url, received) = spawn_server(false).await;
    let client = client_for(&url);

    // Not connected yet: both are buffered.
    client
        .send(json!({"cmd": "leave_session_req", "data": {"n": 1}}).to_string())
        .unwrap();
    client
        .send(json!({"cmd": "leave_session_req", "data": {"n": 2}}).to_string())
        .unwrap();
    assert_eq!(client.queue_len(), 2);

    client.connect().await.unwrap();
    wait_until(|| received.lock().unwrap().len() == 2).await;

    let seen = received.lock().unwrap();
    assert_eq!(seen[0]["data"]["n"], 1);
    assert_eq!(seen[1]["data"]["n"], 2);
    assert_eq!(client.queue_len(), 0);
    client.disconnect();
}

#[tokio::test]
async fn reconnect_heals_and_resets_backoff() {
    let (url, received) = spawn_server(true).await;
    let client = client_for(&url);

    let reconnected = Arc::new(Mutex::new(false));
    let flag = reconnected.clone();
    client.set_reconnect_callback(Some(Arc::new(move || {
        *flag.lock().unwrap() = true;
    })));

    // First connection is dropped by the server immediately.
    let _ = client.connect().await;
    wait_until(|| *reconnected.lock().unwrap()).await;
    assert!(client.is_connected());
    // Success resets the backoff to base.
    assert_eq!(
        client.reconnect_interval(),
        MessageClientConfig::default().reconnect_base_interval
    );

    // And the healed connection still carries traffic.
    client
        .send(json!({"cmd": "get_member_list", "data": {}}).to_string())
        .unwrap();
    wait_until(|| {
        received
            .lock()
            .unwrap()
            .iter()
            .any(|e| e["cmd"] == "get_member_list")
    })
    .await;
    client.disconnect();
}

#[tokio::test]
async fn create_session_records_owner_and_invites_members() {
    let (url, received) = spawn_server(false).await;
    let client = Arc::new(client_for(&url));
    client.connect().await.unwrap();

    let sessions = SessionManager::new("alice.aid.net");
    sessions.attach(Some(client.clone()));

    let session_id = sessions
        .create_session(&[
            "bob.aid.net".to_string(),
            "carol.aid.net".to_string(),
            // Self and empty entries are skipped.
            "alice.aid.net".to_string(),
            String::new(),
        ])
        .await
        .unwrap();
    assert_eq!(session_id, "srv-sess-1");

    let members = sessions.member_list(&session_id).unwrap();
    let mut roles: Vec<(String, String)> = members
        .iter()
        .map(|m| (m.agent_id.clone(), format!("{:?}", m.role).to_lowercase()))
        .collect();
    roles.sort();
    assert_eq!(
        roles,
        vec![
            ("alice.aid.net".to_string(), "owner".to_string()),
            ("bob.aid.net".to_string(), "member".to_string()),
            ("carol.aid.net".to_string(), "member".to_string()),
        ]
    );

    // Exactly two invites, sender alice, one per non-self member.
    wait_until(|| {
        received
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e["cmd"] == "invite_agent_req")
            .count()
            == 2
    })
    .await;
    let seen = received.lock().unwrap();
    let invites: Vec<&Value> = seen
        .iter()
        .filter(|e| e["cmd"] == "invite_agent_req")
        .collect();
    let mut acceptors: Vec<&str> = invites
        .iter()
        .map(|e| e["data"]["acceptor_id"].as_str().unwrap())
        .collect();
    acceptors.sort();
    assert_eq!(acceptors, vec!["bob.aid.net", "carol.aid.net"]);
    for invite in invites {
        assert_eq!(invite["data"]["inviter_id"], "alice.aid.net");
        assert_eq!(invite["data"]["session_id"], "srv-sess-1");
    }
    client.disconnect();
}

#[tokio::test]
async fn create_session_falls_back_to_local_id_without_transport() {
    let sessions = SessionManager::new("alice.aid.net");
    // No client attached: the id is generated locally.
    let session_id = sessions
        .create_session(&["bob.aid.net".to_string()])
        .await
        .unwrap();
    assert!(session_id.starts_with("session-"));
    let members = sessions.member_list(&session_id).unwrap();
    assert_eq!(members.len(), 2);
}
