//! `carelog-core`: event-sourcing building blocks.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns).

pub mod aggregate;
pub mod error;
pub mod id;

pub use aggregate::{Aggregate, AggregateRoot, EventSourced, ExpectedVersion};
pub use error::DomainError;
pub use id::AggregateId;
