use crate::protocol::Message;

/// Bidirectional message pipe between a client and the gateway.
///
/// `recv` must be cancel safe: the gateway polls it inside `select!` next to
/// the session subscription.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    async fn send(&mut self, msg: Message) -> anyhow::Result<()>;
    async fn recv(&mut self) -> anyhow::Result<Message>;
}

pub mod in_memory;
pub mod tcp;
