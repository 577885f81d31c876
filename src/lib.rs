//! # framewire
//!
//! TCP server core for length/type-framed messages.
//!
//! A [`SocketListener`] accepts connections and gives each one a
//! [`ConnectionHandler`] running on its own Tokio task. Handlers read frames
//! off the socket, turn them into [`FramedMessage`]s through a
//! [`MessageRegistry`] and publish them to subscribers, tagged with the
//! connection they came from so consumers can reply.
//!
//! ## Wire format
//!
//! Every frame is an 11-byte big-endian header followed by the payload:
//!
//! ```text
//! type u16 | flags u8 | handle u32 | length u32 | payload[length]
//! ```
//!
//! See [`protocol`] for details.
//!
//! ## Example
//!
//! ```no_run
//! use framewire::{FramedMessage, SocketListener, TypedMessage};
//!
//! #[tokio::main]
//! async fn main() -> framewire::Result<()> {
//!     let listener = SocketListener::builder()
//!         .typed_message::<String>(1, "echo")
//!         .build();
//!
//!     let mut messages = listener.subscribe();
//!     listener.listen_port(7000).await?;
//!
//!     while let Some(event) = messages.recv().await {
//!         if let Some(echo) = event.message.downcast_ref::<TypedMessage<String>>() {
//!             event.handler.respond_typed(echo, echo.value()).await?;
//!         }
//!     }
//!     Ok(())
//! }
//! ```

pub mod codec;
pub mod connection;
pub mod error;
pub mod listener;
pub mod message;
pub mod protocol;
pub mod writer;

mod cancel;

pub use cancel::CancelToken;
pub use connection::{ConnectionConfig, ConnectionHandler, ConnectionId, ReceiveOutcome};
pub use error::{FramewireError, Result};
pub use listener::{
    ListenerBuilder, ListenerConfig, ListenerState, MessageReceived, SocketListener, Subscription,
};
pub use message::{
    FaultReason, FaultedMessage, FramedMessage, MessageFactory, MessageRef, MessageRegistry,
    PayloadStream, RawMessage, TypedMessage,
};
