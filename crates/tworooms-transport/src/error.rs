use std::net::SocketAddr;

/// Errors raised by the listener or by a single connection.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The listener could not bind its address.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// Accepting a TCP socket failed.
    #[error("accept failed: {0}")]
    Accept(#[source] std::io::Error),

    /// The peer connected but the WebSocket upgrade did not complete.
    #[error("websocket handshake with {peer} failed: {reason}")]
    Handshake { peer: SocketAddr, reason: String },

    /// Writing a frame failed; the connection is unusable.
    #[error("send failed: {0}")]
    Send(String),

    /// Reading a frame failed; the connection is unusable.
    #[error("receive failed: {0}")]
    Receive(String),
}
