//! Command handler wiring for the shipped domains.

pub mod admissions;

pub use admissions::register_admission_handlers;
