//! Integration tests for the WebSocket transport.
//!
//! These spin up a real listener on an OS-assigned port and talk to it
//! with a `tokio-tungstenite` client.

#[cfg(feature = "websocket")]
mod websocket {
    use std::sync::Arc;
    use std::time::Duration;

    use futures_util::{SinkExt, StreamExt};
    use tokio_tungstenite::tungstenite::Message;
    use tworooms_transport::{Connection, Transport, WebSocketTransport};

    type Client = tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >;

    /// Binds a transport on port 0, connects one client, returns both ends.
    async fn connected_pair()
    -> (tworooms_transport::WebSocketConnection, Client) {
        let mut transport = WebSocketTransport::bind("127.0.0.1:0")
            .await
            .expect("should bind");
        let addr = transport.local_addr().expect("bound address");

        let server = tokio::spawn(async move {
            transport.accept().await.expect("should accept")
        });
        let (client, _) =
            tokio_tungstenite::connect_async(format!("ws://{addr}"))
                .await
                .expect("client should connect");
        let conn = server.await.expect("task should complete");
        (conn, client)
    }

    #[tokio::test]
    async fn test_websocket_send_json_arrives_as_text() {
        let (conn, mut client) = connected_pair().await;
        assert!(conn.id().into_inner() > 0);

        conn.send(br#"{"type":"ACK"}"#).await.expect("send");

        let msg = client.next().await.unwrap().unwrap();
        assert!(msg.is_text());
        assert_eq!(msg.into_text().unwrap().as_str(), r#"{"type":"ACK"}"#);
    }

    #[tokio::test]
    async fn test_websocket_recv_text_and_binary() {
        let (conn, mut client) = connected_pair().await;

        client.send(Message::Text("hello".into())).await.unwrap();
        client
            .send(Message::Binary(b"bytes".to_vec().into()))
            .await
            .unwrap();

        assert_eq!(conn.recv().await.unwrap().unwrap(), b"hello");
        assert_eq!(conn.recv().await.unwrap().unwrap(), b"bytes");
    }

    #[tokio::test]
    async fn test_websocket_send_while_recv_pending() {
        let (conn, mut client) = connected_pair().await;
        let conn = Arc::new(conn);

        // Park a reader on the connection, then write from another task.
        let reader = {
            let conn = Arc::clone(&conn);
            tokio::spawn(async move { conn.recv().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        tokio::time::timeout(Duration::from_secs(2), conn.send(b"ping"))
            .await
            .expect("send must not wait for the pending recv")
            .expect("send");
        let msg = client.next().await.unwrap().unwrap();
        assert_eq!(msg.into_data().as_ref(), b"ping");

        client.send(Message::Text("pong".into())).await.unwrap();
        let got = reader.await.unwrap().unwrap().unwrap();
        assert_eq!(got, b"pong");
    }

    #[tokio::test]
    async fn test_websocket_recv_returns_none_on_client_close() {
        let (conn, mut client) = connected_pair().await;

        client.send(Message::Close(None)).await.unwrap();

        let result = conn.recv().await.expect("recv should not error");
        assert!(result.is_none(), "should return None on client close");
    }

    #[tokio::test]
    async fn test_websocket_pong_skipped_but_refreshes_last_seen() {
        let (conn, mut client) = connected_pair().await;
        let opened = conn.last_seen();
        tokio::time::sleep(Duration::from_millis(20)).await;

        client.send(Message::Pong(Vec::new().into())).await.unwrap();
        client.send(Message::Text("after".into())).await.unwrap();

        assert_eq!(conn.recv().await.unwrap().unwrap(), b"after");
        assert!(conn.last_seen() > opened);
    }

    #[tokio::test]
    async fn test_websocket_ping_answered_by_client_counts_as_activity() {
        let (conn, mut client) = connected_pair().await;
        let conn = Arc::new(conn);
        let opened = conn.last_seen();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let reader = {
            let conn = Arc::clone(&conn);
            tokio::spawn(async move { conn.recv().await })
        };
        conn.ping().await.expect("ping");

        // The client queues its pong when it reads the ping and writes it
        // on the next flush.
        let msg = client.next().await.unwrap().unwrap();
        assert!(msg.is_ping());
        client.flush().await.unwrap();

        tokio::time::timeout(Duration::from_secs(2), async {
            while conn.last_seen() <= opened {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("pong should refresh last_seen");
        assert!(!reader.is_finished(), "a pong is not a frame for the caller");
        reader.abort();
    }
}
