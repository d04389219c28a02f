//! Live event delivery.
//!
//! The [`StreamBridge`] accepts [`EventRecord`](tribunal_common::EventRecord)s
//! from the blocking session controllers and delivers them to an
//! [`EventSubscriber`] on its own thread.

mod bridge;
mod subscriber;

pub use bridge::{
    BridgeConfig, BridgeStats, DEFAULT_DELIVERY_TIMEOUT, DEFAULT_QUEUE_CAPACITY, EventPublisher,
    StreamBridge,
};
pub use subscriber::{
    BroadcastSubscriber, ChannelSubscriber, EventSubscriber, FanOutSubscriber,
    JsonLinesSubscriber, NullSubscriber,
};
