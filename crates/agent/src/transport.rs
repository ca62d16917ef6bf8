//! The transport boundary. ROP is transport-agnostic by design (section 1);
//! an Agent just needs something that yields inbound text frames and
//! accepts outbound ones. The canonical implementation wraps a WebSocket
//! (`tokio-tungstenite`); an in-memory duplex pair backs the test suite.

use std::pin::Pin;

use futures::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::Message as WsMessage;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// A message-framed duplex transport carrying already-complete text frames.
/// Each `recv()` yields one complete ROP message body; each `send()` writes
/// one.
#[allow(async_fn_in_trait)]
pub trait Transport {
	async fn recv(&mut self) -> Option<Result<String, BoxError>>;
	async fn send(&mut self, text: String) -> Result<(), BoxError>;
}

/// A WebSocket-backed transport over any `tokio-tungstenite` stream
/// (`connect_async`'s client socket or `accept_async`'s server socket both
/// implement the underlying `Stream + Sink` pair).
pub struct WebSocketTransport<S> {
	inner: Pin<Box<S>>,
}

impl<S> WebSocketTransport<S>
where
	S: futures::Stream<Item = Result<WsMessage, tokio_tungstenite::tungstenite::Error>>
		+ futures::Sink<WsMessage, Error = tokio_tungstenite::tungstenite::Error>,
{
	pub fn new(socket: S) -> Self {
		Self { inner: Box::pin(socket) }
	}
}

impl<S> Transport for WebSocketTransport<S>
where
	S: futures::Stream<Item = Result<WsMessage, tokio_tungstenite::tungstenite::Error>>
		+ futures::Sink<WsMessage, Error = tokio_tungstenite::tungstenite::Error>,
{
	async fn recv(&mut self) -> Option<Result<String, BoxError>> {
		loop {
			match self.inner.next().await {
				Some(Ok(WsMessage::Text(text))) => return Some(Ok(text.to_string())),
				Some(Ok(WsMessage::Close(_))) | None => return None,
				// Ping/Pong/Binary/Frame frames carry no protocol content.
				Some(Ok(_)) => continue,
				Some(Err(e)) => return Some(Err(Box::new(e))),
			}
		}
	}

	async fn send(&mut self, text: String) -> Result<(), BoxError> {
		self.inner
			.send(WsMessage::Text(text.into()))
			.await
			.map_err(|e| Box::new(e) as BoxError)
	}
}

/// An in-process duplex transport built from a pair of unbounded channels,
/// for exercising two `Agent`s against each other without a real socket.
pub struct ChannelTransport {
	rx: tokio::sync::mpsc::UnboundedReceiver<String>,
	tx: tokio::sync::mpsc::UnboundedSender<String>,
}

impl ChannelTransport {
	/// Builds a connected pair: frames sent on one side arrive on the other.
	pub fn pair() -> (Self, Self) {
		let (tx_a, rx_a) = tokio::sync::mpsc::unbounded_channel();
		let (tx_b, rx_b) = tokio::sync::mpsc::unbounded_channel();
		(Self { rx: rx_a, tx: tx_b }, Self { rx: rx_b, tx: tx_a })
	}
}

impl Transport for ChannelTransport {
	async fn recv(&mut self) -> Option<Result<String, BoxError>> {
		self.rx.recv().await.map(Ok)
	}

	async fn send(&mut self, text: String) -> Result<(), BoxError> {
		self.tx.send(text).map_err(|e| Box::new(e) as BoxError)
	}
}
