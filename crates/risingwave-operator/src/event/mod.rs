//! Events recorded on RisingWave objects.

use kube::runtime::events::EventType;
use strum::{AsRefStr, Display};

mod hook;
mod message_store;

pub use self::{
    hook::{EventHook, EventSink, RecorderSink},
    message_store::MessageStore,
};

#[derive(AsRefStr, Clone, Copy, Debug, Display, Eq, PartialEq)]
pub enum RisingWaveEvent {
    Initializing,
    Running,
    Upgrading,
    Recovering,
    Unhealthy,
}

impl RisingWaveEvent {
    /// Events emitted whenever a message was stored for them during the pass.
    pub const WARNINGS: [Self; 1] = [Self::Unhealthy];

    pub fn event_type(self) -> EventType {
        match self {
            Self::Unhealthy => EventType::Warning,
            Self::Initializing | Self::Running | Self::Upgrading | Self::Recovering => {
                EventType::Normal
            }
        }
    }
}
