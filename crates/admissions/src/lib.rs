//! Patient admission / discharge / transfer domain (event-sourced).
//!
//! This crate contains business rules only, implemented as deterministic
//! domain logic (no IO, no storage).

pub mod encounter;

pub use encounter::{
    AdmitPatient, DischargePatient, Encounter, EncounterCommand, EncounterEvent, PatientAdmitted,
    PatientDischarged, PatientId, PatientTransferred, TransferPatient,
};
