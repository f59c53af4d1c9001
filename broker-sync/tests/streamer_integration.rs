//! Integration tests for the C2 market-data streamer's connection
//! lifecycle against a real local WebSocket server: subscription replay on
//! a fresh authenticate, and reconnect after the broker reports
//! authentication failure (`spec.md` §4.2/§5).

use async_trait::async_trait;
use broker_sync::{CredentialRefresh, MarketDataStreamer};
use futures_util::{SinkExt, StreamExt};
use model::market_data::{InstrumentKind, Subscription};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::{timeout, Duration};
use tokio_tungstenite::tungstenite::Message;

struct StaticCredentials;

#[async_trait]
impl CredentialRefresh for StaticCredentials {
    async fn refresh(&self) -> anyhow::Result<(String, Option<String>)> {
        Ok(("session=abc123".to_string(), Some("sso-token".to_string())))
    }
}

async fn recv_text(
    stream: &mut (impl futures_util::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin),
) -> String {
    loop {
        match stream.next().await {
            Some(Ok(Message::Text(text))) => return text,
            Some(Ok(_)) => continue,
            other => panic!("expected a text frame, got {other:?}"),
        }
    }
}

#[tokio::test]
async fn replays_cached_subscriptions_once_the_server_confirms_authentication() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    let (observed_tx, mut observed_rx) = mpsc::channel::<String>(4);

    tokio::spawn(async move {
        let (tcp, _) = listener.accept().await.expect("accept");
        let mut ws = tokio_tungstenite::accept_async(tcp).await.expect("server handshake");

        let _session_frame = recv_text(&mut ws).await;
        ws.send(Message::Text(r#"{"topic":"sts","authenticated":true}"#.to_string()))
            .await
            .expect("send status frame");

        let subscribe_frame = recv_text(&mut ws).await;
        let _ = observed_tx.send(subscribe_frame).await;
    });

    let streamer = MarketDataStreamer::new(format!("ws://{addr}"), None);
    streamer.set_credential_refresh_callback(Arc::new(StaticCredentials)).await;
    streamer
        .subscribe(Subscription::new(756733, Some("SPY".to_string()), InstrumentKind::Stock), None)
        .await;

    let run_handle = tokio::spawn(streamer.clone().run());

    let subscribe_frame = timeout(Duration::from_secs(5), observed_rx.recv())
        .await
        .expect("server should observe a replayed subscription within 5s")
        .expect("channel should yield the captured frame");
    assert!(subscribe_frame.starts_with("smd+756733+"), "unexpected frame: {subscribe_frame}");

    streamer.disconnect();
    let _ = timeout(Duration::from_secs(2), run_handle).await;
}

#[tokio::test]
async fn authentication_failure_forces_a_fresh_reconnect() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    let (reconnected_tx, mut reconnected_rx) = mpsc::channel::<()>(1);

    tokio::spawn(async move {
        // First connection: the broker reports authentication failure,
        // which should make the streamer tear down and redial immediately.
        let (tcp, _) = listener.accept().await.expect("accept first connection");
        let mut ws = tokio_tungstenite::accept_async(tcp).await.expect("first handshake");
        let _session_frame = recv_text(&mut ws).await;
        ws.send(Message::Text(r#"{"topic":"sts","authenticated":false}"#.to_string()))
            .await
            .expect("send failure status");
        drop(ws);

        // Second connection: the streamer's own reconnect attempt.
        let (tcp, _) = listener.accept().await.expect("accept second connection");
        let mut ws = tokio_tungstenite::accept_async(tcp).await.expect("second handshake");
        let _session_frame = recv_text(&mut ws).await;
        let _ = reconnected_tx.send(()).await;
        let _ = ws.send(Message::Text(r#"{"topic":"sts","authenticated":true}"#.to_string())).await;
    });

    let streamer = MarketDataStreamer::new(format!("ws://{addr}"), None);
    streamer.set_credential_refresh_callback(Arc::new(StaticCredentials)).await;
    let run_handle = tokio::spawn(streamer.clone().run());

    timeout(Duration::from_secs(5), reconnected_rx.recv())
        .await
        .expect("streamer should redial after an authentication failure")
        .expect("channel should not close without signalling");

    streamer.disconnect();
    let _ = timeout(Duration::from_secs(2), run_handle).await;
}
