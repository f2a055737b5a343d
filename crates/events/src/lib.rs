//! Events, commands, global log positions and projection contracts.

pub mod command;
pub mod event;
pub mod position;
pub mod projection;
pub mod recorded;
pub mod subscription;

pub use command::Command;
pub use event::Event;
pub use position::GlobalPosition;
pub use projection::{Projection, ProjectionError, ProjectionHandler};
pub use recorded::{RecordedEvent, StreamId};
pub use subscription::{
    AllSubscription, DropReason, SubscriptionDropped, SubscriptionMessage, SubscriptionSender,
};
