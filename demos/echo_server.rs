//! Echo server.
//!
//! Replies to every raw frame (type 1) with the same payload and to every
//! text frame (type 2, MsgPack string) with the uppercased text. Faulted
//! frames get a faulted reply carrying the fault reason.
//!
//! ```text
//! RUST_LOG=framewire=debug cargo run --example echo_server -- 7000
//! ```

use framewire::{FaultedMessage, FramedMessage, MessageReceived, SocketListener, TypedMessage};
use tracing_subscriber::EnvFilter;

const RAW_ECHO: u16 = 1;
const TEXT_ECHO: u16 = 2;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .compact()
        .init();

    let port = std::env::args()
        .nth(1)
        .map(|p| p.parse::<u16>())
        .transpose()?
        .unwrap_or(7000);

    let listener = SocketListener::builder()
        .raw_message(RAW_ECHO, "echo")
        .typed_message::<String>(TEXT_ECHO, "shout")
        .build();

    let mut messages = listener.subscribe();
    let addr = listener.listen_port(port).await?;
    tracing::info!(%addr, "echo server ready");

    let replies = tokio::spawn(async move {
        while let Some(event) = messages.recv().await {
            if let Err(e) = reply(&event).await {
                tracing::warn!(connection = %event.handler.id(), error = %e, "reply failed");
            }
        }
    });

    tokio::signal::ctrl_c().await?;
    let disposed = listener.stop().await;
    tracing::info!(disposed, "shut down");

    replies.await?;
    Ok(())
}

async fn reply(event: &MessageReceived) -> framewire::Result<()> {
    let message = event.message.as_ref();

    if let Some(faulted) = message.downcast_ref::<FaultedMessage>() {
        return event
            .handler
            .respond_fault(message, faulted.reason().to_string())
            .await;
    }

    if let Some(text) = message.downcast_ref::<TypedMessage<String>>() {
        return event
            .handler
            .respond_typed(message, &text.value().to_uppercase())
            .await;
    }

    event.handler.respond(message, message.payload().clone()).await
}
