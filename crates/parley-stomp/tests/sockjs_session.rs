//! End-to-end tests of the SockJS connector against an in-process broker
//! that speaks just enough SockJS-over-websocket and STOMP.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

use parley_core::config::BrokerConfig;
use parley_stomp::{ConnectRequest, Connector, HeartBeat, SockJsConnector, StompError, StompEvent};

/// How the fake broker answers the CONNECT frame.
#[derive(Clone)]
enum Script {
    /// CONNECTED, then push one MESSAGE per SUBSCRIBE, then close on "bye".
    Echo,
    /// ERROR instead of CONNECTED.
    Reject,
    /// CONNECTED promising 100ms heart-beats, then silence.
    Silent,
    /// Opens the SockJS session but never answers CONNECT.
    Mute,
}

fn sockjs_array(frame: &str) -> String {
    format!("a{}", serde_json::to_string(&vec![frame]).unwrap())
}

/// Start the broker; returns its base URL and a channel of CONNECT frames seen.
async fn start_broker(script: Script) -> (String, mpsc::UnboundedReceiver<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (seen_tx, seen_rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                return;
            };
            let script = script.clone();
            let seen_tx = seen_tx.clone();
            tokio::spawn(async move {
                // The info probe is plain HTTP and fails the upgrade; ignore it.
                let Ok(ws) = tokio_tungstenite::accept_async(stream).await else {
                    return;
                };
                let (mut sink, mut stream) = ws.split();
                sink.send(Message::Text("o".to_string())).await.unwrap();

                while let Some(Ok(Message::Text(text))) = stream.next().await {
                    let frames: Vec<String> = serde_json::from_str(&text).unwrap();
                    for frame in frames {
                        let reply = if frame.starts_with("CONNECT") {
                            let _ = seen_tx.send(frame.clone());
                            match script {
                                Script::Echo => {
                                    Some(sockjs_array("CONNECTED\nversion:1.2\nheart-beat:0,0\n\n\0"))
                                }
                                Script::Reject => {
                                    Some(sockjs_array("ERROR\nmessage:not allowed\n\n\0"))
                                }
                                Script::Silent => Some(sockjs_array(
                                    "CONNECTED\nversion:1.2\nheart-beat:100,0\n\n\0",
                                )),
                                Script::Mute => None,
                            }
                        } else if frame.starts_with("SUBSCRIBE") {
                            let dest = frame
                                .lines()
                                .find_map(|l| l.strip_prefix("destination:"))
                                .unwrap()
                                .to_string();
                            Some(sockjs_array(&format!(
                                "MESSAGE\ndestination:{dest}\nsubscription:sub-0\n\n{{\"count\":3}}\0"
                            )))
                        } else if frame.starts_with("SEND") && frame.contains("bye") {
                            Some(r#"c[3000,"Go away!"]"#.to_string())
                        } else {
                            None
                        };
                        if let Some(reply) = reply {
                            sink.send(Message::Text(reply)).await.unwrap();
                        }
                    }
                }
            });
        }
    });

    (format!("http://{addr}"), seen_rx)
}

fn broker_config(base_url: &str) -> BrokerConfig {
    BrokerConfig {
        base_url: base_url.to_string(),
        transports: vec!["websocket".to_string()],
        ..BrokerConfig::default()
    }
}

fn connector(base_url: &str) -> SockJsConnector {
    SockJsConnector::new(&broker_config(base_url), reqwest::Client::new())
}

fn request(incoming_ms: u64) -> ConnectRequest {
    ConnectRequest {
        headers: vec![("userId".to_string(), "u-1".to_string())],
        heart_beat: HeartBeat::new(0, incoming_ms),
    }
}

#[tokio::test]
async fn test_connect_subscribe_receive_and_close() {
    let (base_url, mut seen) = start_broker(Script::Echo).await;
    let mut session = connector(&base_url).connect(request(0)).await.unwrap();

    let connect_frame = seen.recv().await.unwrap();
    assert!(connect_frame.contains("userId:u-1\n"));
    assert!(connect_frame.contains("heart-beat:0,0\n"));

    session.handle.subscribe("/topic/presence").unwrap();
    let event = tokio::time::timeout(Duration::from_secs(5), session.events.recv())
        .await
        .unwrap();
    assert_eq!(
        event,
        Some(StompEvent::Message {
            destination: "/topic/presence".to_string(),
            body: "{\"count\":3}".to_string(),
        })
    );

    session.handle.publish("/app/chat.send", "{\"content\":\"bye\"}").unwrap();
    let event = tokio::time::timeout(Duration::from_secs(5), session.events.recv())
        .await
        .unwrap();
    assert_eq!(
        event,
        Some(StompEvent::Closed {
            code: Some(3000),
            reason: "Go away!".to_string(),
        })
    );
}

#[tokio::test]
async fn test_error_frame_during_handshake_is_protocol_error() {
    let (base_url, _seen) = start_broker(Script::Reject).await;
    let result = connector(&base_url).connect(request(0)).await;
    match result {
        Err(StompError::Protocol(message)) => assert_eq!(message, "not allowed"),
        other => panic!("expected protocol error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_missing_server_heartbeats_end_the_session() {
    let (base_url, _seen) = start_broker(Script::Silent).await;
    let mut session = connector(&base_url).connect(request(100)).await.unwrap();
    assert_eq!(
        session.negotiated.incoming,
        Some(Duration::from_millis(100))
    );

    let event = tokio::time::timeout(Duration::from_secs(5), session.events.recv())
        .await
        .unwrap();
    assert_eq!(
        event,
        Some(StompEvent::TransportError(
            "missed server heart-beats".to_string()
        ))
    );
}

#[tokio::test]
async fn test_unanswered_connect_times_out() {
    let (base_url, mut seen) = start_broker(Script::Mute).await;
    let config = BrokerConfig {
        handshake_timeout_ms: 200,
        ..broker_config(&base_url)
    };

    let started = std::time::Instant::now();
    let result = SockJsConnector::new(&config, reqwest::Client::new())
        .connect(request(0))
        .await;
    assert!(seen.recv().await.unwrap().starts_with("CONNECT\n"));
    match result {
        Err(StompError::Handshake(message)) => assert_eq!(message, "no CONNECTED frame"),
        other => panic!("expected handshake timeout, got {other:?}"),
    }
    assert!(started.elapsed() >= Duration::from_millis(200));
}

#[tokio::test]
async fn test_unreachable_broker_fails_to_connect() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let result = connector(&format!("http://{addr}")).connect(request(0)).await;
    assert!(result.is_err());
}
