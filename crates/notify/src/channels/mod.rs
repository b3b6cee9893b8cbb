//! Notification channel implementations.

pub mod slack;

use async_trait::async_trait;

use crate::error::ChannelError;
use crate::events::FleetEvent;

/// Trait for notification channels.
#[async_trait]
pub trait NotifyChannel: Send + Sync {
    /// Get the name of this channel.
    fn name(&self) -> &'static str;

    /// Check if this channel is enabled/configured.
    fn enabled(&self) -> bool;

    /// Send a notification event to this channel.
    async fn send(&self, event: &FleetEvent) -> Result<(), ChannelError>;
}
