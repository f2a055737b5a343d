//! Background workers.

pub mod projection_manager;

pub use projection_manager::{
    CheckpointPolicy, ProjectionManager, ProjectionManagerConfig, ProjectionManagerError,
    ProjectionManagerHandle, ProjectionStatus, SubscriptionPhase, SubscriptionState,
};
