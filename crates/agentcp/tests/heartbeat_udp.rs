//! Heartbeat client against a loopback UDP endpoint.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::time::timeout;

use agentcp::proto::udp::{
    HeartbeatRequest, HeartbeatResponse, InviteRequest, InviteResponse, UdpHeader,
    MSG_TYPE_HEARTBEAT_RESP, MSG_TYPE_INVITE_REQ, NEXT_BEAT_REAUTH,
};
use agentcp::{HeartbeatClient, HeartbeatEndpoint};

struct Server {
    socket: UdpSocket,
}

impl Server {
    async fn bind() -> Self {
        Self {
            socket: UdpSocket::bind("127.0.0.1:0").await.unwrap(),
        }
    }

    fn endpoint(&self, cookie: u64) -> HeartbeatEndpoint {
        let addr = self.socket.local_addr().unwrap();
        HeartbeatEndpoint {
            server_ip: addr.ip().to_string(),
            port: addr.port(),
            sign_cookie: cookie,
        }
    }

    async fn recv(&self) -> (Vec<u8>, std::net::SocketAddr) {
        let mut buf = [0u8; 1536];
        let (n, peer) = timeout(Duration::from_secs(10), self.socket.recv_from(&mut buf))
            .await
            .expect("no datagram in time")
            .unwrap();
        (buf[..n].to_vec(), peer)
    }
}

#[tokio::test]
async fn heartbeats_carry_cookie_and_adopt_server_interval() {
    let server = Server::bind().await;
    let client = HeartbeatClient::new(
        "alice.aid.net",
        server.endpoint(111),
        Arc::new(|| Box::pin(async { None::<HeartbeatEndpoint> })),
    );
    client.online().await.unwrap();

    let (datagram, peer) = server.recv().await;
    let req = HeartbeatRequest::decode(&datagram).unwrap();
    assert_eq!(req.agent_id, "alice.aid.net");
    assert_eq!(req.sign_cookie, 111);
    assert_eq!(client.interval_ms(), 5_000);

    // The server dictates the next interval (floored at 5s on our side).
    let resp = HeartbeatResponse {
        header: UdpHeader::new(MSG_TYPE_HEARTBEAT_RESP, 1, 8),
        next_beat: 60_000,
    };
    server.socket.send_to(&resp.encode(), peer).await.unwrap();
    timeout(Duration::from_secs(5), async {
        while client.interval_ms() != 60_000 {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("interval not adopted");

    let resp = HeartbeatResponse {
        header: UdpHeader::new(MSG_TYPE_HEARTBEAT_RESP, 2, 8),
        next_beat: 100,
    };
    server.socket.send_to(&resp.encode(), peer).await.unwrap();
    timeout(Duration::from_secs(5), async {
        while client.interval_ms() != 5_000 {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("floor not applied");

    client.offline();
    assert!(!client.is_running());
}

#[tokio::test]
async fn invites_are_dispatched_and_acknowledged() {
    let server = Server::bind().await;
    let client = HeartbeatClient::new(
        "alice.aid.net",
        server.endpoint(77),
        Arc::new(|| Box::pin(async { None::<HeartbeatEndpoint> })),
    );
    let invites: Arc<Mutex<Vec<(String, String)>>> = Arc::new(Mutex::new(Vec::new()));
    let log = invites.clone();
    client.set_invite_callback(Some(Arc::new(move |invite| {
        log.lock()
            .unwrap()
            .push((invite.session_id.clone(), invite.inviter_agent_id.clone()));
    })));
    client.online().await.unwrap();

    // First heartbeat tells us the client's address.
    let (_, peer) = server.recv().await;

    let invite = InviteRequest {
        header: UdpHeader::new(MSG_TYPE_INVITE_REQ, 9, 0),
        inviter_agent_id: "bob.aid.net".into(),
        invite_code: "c0de".into(),
        invite_code_expire: 0,
        session_id: "sess-42".into(),
        message_server: "https://msg.aid.net".into(),
    };
    server.socket.send_to(&invite.encode(), peer).await.unwrap();

    // The client echoes an invite response carrying its cookie.
    let (datagram, _) = server.recv().await;
    let resp = InviteResponse::decode(&datagram).unwrap();
    assert_eq!(resp.agent_id, "alice.aid.net");
    assert_eq!(resp.inviter_agent_id, "bob.aid.net");
    assert_eq!(resp.session_id, "sess-42");
    assert_eq!(resp.sign_cookie, 77);
    assert_eq!(
        *invites.lock().unwrap(),
        vec![("sess-42".to_string(), "bob.aid.net".to_string())]
    );

    client.offline();
}

#[tokio::test]
async fn reauth_sentinel_triggers_sign_in_and_new_cookie() {
    let server = Server::bind().await;
    let endpoint = server.endpoint(111);
    let renewed = endpoint.clone();
    let reauths = Arc::new(Mutex::new(0u32));
    let counter = reauths.clone();

    let client = HeartbeatClient::new(
        "alice.aid.net",
        endpoint,
        Arc::new(move || {
            let renewed = renewed.clone();
            let counter = counter.clone();
            Box::pin(async move {
                *counter.lock().unwrap() += 1;
                Some(HeartbeatEndpoint {
                    sign_cookie: 222,
                    ..renewed
                })
            })
        }),
    );
    client.online().await.unwrap();

    let (datagram, peer) = server.recv().await;
    assert_eq!(HeartbeatRequest::decode(&datagram).unwrap().sign_cookie, 111);

    let resp = HeartbeatResponse {
        header: UdpHeader::new(MSG_TYPE_HEARTBEAT_RESP, 1, 8),
        next_beat: NEXT_BEAT_REAUTH,
    };
    server.socket.send_to(&resp.encode(), peer).await.unwrap();

    // The next heartbeat (sent promptly after re-auth) carries the fresh
    // cookie.
    let cookie = timeout(Duration::from_secs(10), async {
        loop {
            let (datagram, _) = server.recv().await;
            if let Ok(req) = HeartbeatRequest::decode(&datagram) {
                if req.sign_cookie != 111 {
                    break req.sign_cookie;
                }
            }
        }
    })
    .await
    .expect("no re-authenticated heartbeat");
    assert_eq!(cookie, 222);
    assert_eq!(*reauths.lock().unwrap(), 1);
    assert_eq!(client.sign_cookie(), 222);

    client.offline();
}
