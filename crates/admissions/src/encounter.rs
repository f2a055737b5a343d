use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use carelog_core::{Aggregate, AggregateId, AggregateRoot, DomainError};
use carelog_events::{Command, Event};

/// Patient identifier; one encounter stream per patient.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PatientId(pub AggregateId);

impl PatientId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for PatientId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Aggregate root: a patient's hospital encounter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Encounter {
    id: PatientId,
    patient_name: String,
    age_in_years: u32,
    ward_number: u32,
    admitted: bool,
    discharged: bool,
    version: u64,
}

impl Encounter {
    pub fn patient_id(&self) -> PatientId {
        self.id
    }

    pub fn patient_name(&self) -> &str {
        &self.patient_name
    }

    pub fn age_in_years(&self) -> u32 {
        self.age_in_years
    }

    pub fn ward_number(&self) -> u32 {
        self.ward_number
    }

    pub fn is_discharged(&self) -> bool {
        self.discharged
    }
}

impl AggregateRoot for Encounter {
    type Id = PatientId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: AdmitPatient.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdmitPatient {
    pub patient_id: PatientId,
    pub patient_name: String,
    pub age_in_years: u32,
    pub ward_number: u32,
    pub occurred_at: DateTime<Utc>,
}

/// Command: TransferPatient.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferPatient {
    pub patient_id: PatientId,
    pub ward_number: u32,
    pub occurred_at: DateTime<Utc>,
}

/// Command: DischargePatient.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DischargePatient {
    pub patient_id: PatientId,
    pub occurred_at: DateTime<Utc>,
}

impl Command for AdmitPatient {
    fn command_type() -> &'static str {
        "admissions.admit_patient"
    }

    fn target_aggregate_id(&self) -> AggregateId {
        self.patient_id.0
    }
}

impl Command for TransferPatient {
    fn command_type() -> &'static str {
        "admissions.transfer_patient"
    }

    fn target_aggregate_id(&self) -> AggregateId {
        self.patient_id.0
    }
}

impl Command for DischargePatient {
    fn command_type() -> &'static str {
        "admissions.discharge_patient"
    }

    fn target_aggregate_id(&self) -> AggregateId {
        self.patient_id.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EncounterCommand {
    Admit(AdmitPatient),
    Transfer(TransferPatient),
    Discharge(DischargePatient),
}

/// Event: PatientAdmitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatientAdmitted {
    pub patient_id: PatientId,
    pub patient_name: String,
    pub age_in_years: u32,
    pub ward_number: u32,
    pub occurred_at: DateTime<Utc>,
}

/// Event: PatientTransferred.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatientTransferred {
    pub patient_id: PatientId,
    pub from_ward: u32,
    pub ward_number: u32,
    pub occurred_at: DateTime<Utc>,
}

/// Event: PatientDischarged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatientDischarged {
    pub patient_id: PatientId,
    pub ward_number: u32,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EncounterEvent {
    PatientAdmitted(PatientAdmitted),
    PatientTransferred(PatientTransferred),
    PatientDischarged(PatientDischarged),
}

impl EncounterEvent {
    pub const ADMITTED: &'static str = "patient.admitted";
    pub const TRANSFERRED: &'static str = "patient.transferred";
    pub const DISCHARGED: &'static str = "patient.discharged";

    pub fn patient_id(&self) -> PatientId {
        match self {
            EncounterEvent::PatientAdmitted(e) => e.patient_id,
            EncounterEvent::PatientTransferred(e) => e.patient_id,
            EncounterEvent::PatientDischarged(e) => e.patient_id,
        }
    }
}

impl Event for EncounterEvent {
    fn event_type(&self) -> &'static str {
        match self {
            EncounterEvent::PatientAdmitted(_) => Self::ADMITTED,
            EncounterEvent::PatientTransferred(_) => Self::TRANSFERRED,
            EncounterEvent::PatientDischarged(_) => Self::DISCHARGED,
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            EncounterEvent::PatientAdmitted(e) => e.occurred_at,
            EncounterEvent::PatientTransferred(e) => e.occurred_at,
            EncounterEvent::PatientDischarged(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Encounter {
    type Command = EncounterCommand;
    type Event = EncounterEvent;
    type Error = DomainError;

    fn aggregate_type() -> &'static str {
        "encounter"
    }

    fn empty(id: AggregateId) -> Self {
        Self {
            id: PatientId::new(id),
            patient_name: String::new(),
            age_in_years: 0,
            ward_number: 0,
            admitted: false,
            discharged: false,
            version: 0,
        }
    }

    fn apply(&mut self, event: &Self::Event) {
        match event {
            EncounterEvent::PatientAdmitted(e) => {
                self.id = e.patient_id;
                self.patient_name = e.patient_name.clone();
                self.age_in_years = e.age_in_years;
                self.ward_number = e.ward_number;
                self.admitted = true;
            }
            EncounterEvent::PatientTransferred(e) => {
                self.ward_number = e.ward_number;
            }
            EncounterEvent::PatientDischarged(_) => {
                self.discharged = true;
            }
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            EncounterCommand::Admit(cmd) => self.handle_admit(cmd),
            EncounterCommand::Transfer(cmd) => self.handle_transfer(cmd),
            EncounterCommand::Discharge(cmd) => self.handle_discharge(cmd),
        }
    }
}

impl Encounter {
    fn ensure_patient_id(&self, patient_id: PatientId) -> Result<(), DomainError> {
        if self.id != patient_id {
            return Err(DomainError::invariant("patient_id mismatch"));
        }
        Ok(())
    }

    fn ensure_in_care(&self) -> Result<(), DomainError> {
        if !self.admitted {
            return Err(DomainError::not_found());
        }
        if self.discharged {
            return Err(DomainError::invariant("patient already discharged"));
        }
        Ok(())
    }

    fn handle_admit(&self, cmd: &AdmitPatient) -> Result<Vec<EncounterEvent>, DomainError> {
        if self.admitted {
            return Err(DomainError::conflict("patient already admitted"));
        }
        self.ensure_patient_id(cmd.patient_id)?;
        if cmd.patient_name.trim().is_empty() {
            return Err(DomainError::validation("patient name cannot be empty"));
        }
        if cmd.ward_number == 0 {
            return Err(DomainError::validation("ward number must be positive"));
        }

        Ok(vec![EncounterEvent::PatientAdmitted(PatientAdmitted {
            patient_id: cmd.patient_id,
            patient_name: cmd.patient_name.clone(),
            age_in_years: cmd.age_in_years,
            ward_number: cmd.ward_number,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_transfer(&self, cmd: &TransferPatient) -> Result<Vec<EncounterEvent>, DomainError> {
        self.ensure_in_care()?;
        self.ensure_patient_id(cmd.patient_id)?;
        if cmd.ward_number == 0 {
            return Err(DomainError::validation("ward number must be positive"));
        }
        if cmd.ward_number == self.ward_number {
            return Err(DomainError::validation(format!(
                "patient is already in ward {}",
                self.ward_number
            )));
        }

        Ok(vec![EncounterEvent::PatientTransferred(PatientTransferred {
            patient_id: cmd.patient_id,
            from_ward: self.ward_number,
            ward_number: cmd.ward_number,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_discharge(&self, cmd: &DischargePatient) -> Result<Vec<EncounterEvent>, DomainError> {
        self.ensure_in_care()?;
        self.ensure_patient_id(cmd.patient_id)?;

        Ok(vec![EncounterEvent::PatientDischarged(PatientDischarged {
            patient_id: cmd.patient_id,
            ward_number: self.ward_number,
            occurred_at: cmd.occurred_at,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use carelog_core::EventSourced;
    use proptest::prelude::*;

    fn test_patient_id() -> PatientId {
        PatientId::new(AggregateId::new())
    }

    fn test_time() -> DateTime<Utc> {
        Utc::now()
    }

    fn admit(patient_id: PatientId, ward_number: u32) -> EncounterCommand {
        EncounterCommand::Admit(AdmitPatient {
            patient_id,
            patient_name: "Tony Ferguson".to_string(),
            age_in_years: 32,
            ward_number,
            occurred_at: test_time(),
        })
    }

    fn transfer(patient_id: PatientId, ward_number: u32) -> EncounterCommand {
        EncounterCommand::Transfer(TransferPatient {
            patient_id,
            ward_number,
            occurred_at: test_time(),
        })
    }

    fn discharge(patient_id: PatientId) -> EncounterCommand {
        EncounterCommand::Discharge(DischargePatient {
            patient_id,
            occurred_at: test_time(),
        })
    }

    fn admitted(patient_id: PatientId, ward_number: u32) -> Encounter {
        let mut encounter = Encounter::empty(patient_id.0);
        let events = encounter.handle(&admit(patient_id, ward_number)).unwrap();
        encounter.apply(&events[0]);
        encounter
    }

    #[test]
    fn admit_emits_patient_admitted() {
        let patient_id = test_patient_id();
        let encounter = Encounter::empty(patient_id.0);

        let events = encounter.handle(&admit(patient_id, 10)).unwrap();
        assert_eq!(events.len(), 1);
        match &events[0] {
            EncounterEvent::PatientAdmitted(e) => {
                assert_eq!(e.patient_id, patient_id);
                assert_eq!(e.patient_name, "Tony Ferguson");
                assert_eq!(e.age_in_years, 32);
                assert_eq!(e.ward_number, 10);
            }
            _ => panic!("Expected PatientAdmitted event"),
        }
        assert_eq!(events[0].event_type(), EncounterEvent::ADMITTED);
    }

    #[test]
    fn admitting_twice_is_a_conflict() {
        let patient_id = test_patient_id();
        let encounter = admitted(patient_id, 10);

        let err = encounter.handle(&admit(patient_id, 11)).unwrap_err();
        assert!(matches!(err, DomainError::Conflict(_)));
    }

    #[test]
    fn admit_rejects_blank_name_and_ward_zero() {
        let patient_id = test_patient_id();
        let encounter = Encounter::empty(patient_id.0);

        let blank = EncounterCommand::Admit(AdmitPatient {
            patient_id,
            patient_name: "  ".to_string(),
            age_in_years: 40,
            ward_number: 3,
            occurred_at: test_time(),
        });
        assert!(matches!(encounter.handle(&blank), Err(DomainError::Validation(_))));
        assert!(matches!(
            encounter.handle(&admit(patient_id, 0)),
            Err(DomainError::Validation(_))
        ));
    }

    #[test]
    fn transfer_records_previous_ward() {
        let patient_id = test_patient_id();
        let encounter = admitted(patient_id, 10);

        let events = encounter.handle(&transfer(patient_id, 76)).unwrap();
        match &events[0] {
            EncounterEvent::PatientTransferred(e) => {
                assert_eq!(e.from_ward, 10);
                assert_eq!(e.ward_number, 76);
            }
            _ => panic!("Expected PatientTransferred event"),
        }
    }

    #[test]
    fn transfer_of_unknown_patient_is_not_found() {
        let patient_id = test_patient_id();
        let encounter = Encounter::empty(patient_id.0);

        let err = encounter.handle(&transfer(patient_id, 5)).unwrap_err();
        assert_eq!(err, DomainError::NotFound);
    }

    #[test]
    fn transfer_to_current_ward_is_rejected() {
        let patient_id = test_patient_id();
        let encounter = admitted(patient_id, 10);

        let err = encounter.handle(&transfer(patient_id, 10)).unwrap_err();
        assert!(matches!(err, DomainError::Validation(msg) if msg.contains("ward 10")));
    }

    #[test]
    fn discharged_patient_cannot_be_transferred_or_discharged_again() {
        let patient_id = test_patient_id();
        let mut encounter = admitted(patient_id, 10);
        let events = encounter.handle(&discharge(patient_id)).unwrap();
        encounter.apply(&events[0]);

        assert!(encounter.is_discharged());
        assert!(matches!(
            encounter.handle(&transfer(patient_id, 5)),
            Err(DomainError::InvariantViolation(_))
        ));
        assert!(matches!(
            encounter.handle(&discharge(patient_id)),
            Err(DomainError::InvariantViolation(_))
        ));
    }

    #[test]
    fn events_serialize_with_variant_tag() {
        let event = EncounterEvent::PatientDischarged(PatientDischarged {
            patient_id: test_patient_id(),
            ward_number: 4,
            occurred_at: test_time(),
        });
        let json = serde_json::to_value(&event).unwrap();
        assert!(json.get("PatientDischarged").is_some());
        let back: EncounterEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back, event);
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 128,
            ..ProptestConfig::default()
        })]

        /// Property: after any sequence of accepted transfers, the rebuilt
        /// encounter sits in the last requested ward and its version counts
        /// every event.
        #[test]
        fn last_transfer_wins(wards in prop::collection::vec(1u32..200, 1..20)) {
            let patient_id = test_patient_id();
            let mut encounter: EventSourced<Encounter> = EventSourced::new(patient_id.0);
            encounter.execute(&admit(patient_id, 500)).unwrap();

            let mut last = 500;
            for ward in wards {
                if ward == last {
                    continue;
                }
                encounter.execute(&transfer(patient_id, ward)).unwrap();
                last = ward;
            }

            let history = encounter.pending().to_vec();
            let rebuilt: EventSourced<Encounter> = EventSourced::rehydrate(patient_id.0, history.clone());
            prop_assert_eq!(rebuilt.state().ward_number(), last);
            prop_assert_eq!(rebuilt.state().version(), history.len() as u64);
        }
    }
}
