//! Projection implementations (read model builders) and their checkpoints.
//!
//! Projections consume encounter events from the global log and maintain
//! document read models. All projections are:
//! - **Rebuildable**: Can be reconstructed from the global log
//! - **Idempotent**: Safe for at-least-once delivery

pub mod checkpoint;
pub mod patient_demographics;
pub mod ward_view;

pub use checkpoint::{CheckpointStore, ProjectionCheckpoint};
pub use patient_demographics::{Patient, PatientDemographicsProjection};
pub use ward_view::{Ward, WardViewProjection};
