//! Patient demographics projection: one document per patient in care.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use carelog_admissions::{EncounterEvent, PatientId};
use carelog_events::{GlobalPosition, Projection, ProjectionError};

use crate::read_model::{Document, DocumentSession, DocumentStore};

/// Read model: who is in care, and where.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Patient {
    pub id: PatientId,
    pub patient_name: String,
    pub age_in_years: u32,
    pub ward_number: u32,
}

impl Document for Patient {
    const COLLECTION: &'static str = "patients";

    fn document_id(&self) -> String {
        self.id.to_string()
    }
}

/// Maintains [`Patient`] documents.
///
/// - admitted → document stored
/// - transferred → ward updated (last write wins)
/// - discharged → document deleted
pub struct PatientDemographicsProjection {
    documents: Arc<dyn DocumentStore>,
}

impl PatientDemographicsProjection {
    pub const NAME: &'static str = "patient_demographics";

    pub fn new(documents: Arc<dyn DocumentStore>) -> Self {
        Self { documents }
    }
}

#[async_trait]
impl Projection for PatientDemographicsProjection {
    type Event = EncounterEvent;

    fn name(&self) -> &str {
        Self::NAME
    }

    fn can_handle(&self, event_type: &str) -> bool {
        matches!(
            event_type,
            EncounterEvent::ADMITTED | EncounterEvent::TRANSFERRED | EncounterEvent::DISCHARGED
        )
    }

    async fn handle(
        &self,
        _event_type: &str,
        event: EncounterEvent,
        _position: GlobalPosition,
    ) -> Result<(), ProjectionError> {
        let mut session = DocumentSession::open(self.documents.as_ref());

        match event {
            EncounterEvent::PatientAdmitted(e) => {
                session
                    .store(&Patient {
                        id: e.patient_id,
                        patient_name: e.patient_name,
                        age_in_years: e.age_in_years,
                        ward_number: e.ward_number,
                    })
                    .map_err(ProjectionError::store)?;
            }
            EncounterEvent::PatientTransferred(e) => {
                let existing = session
                    .load::<Patient>(&e.patient_id.to_string())
                    .await
                    .map_err(ProjectionError::store)?;
                if let Some(mut patient) = existing {
                    patient.ward_number = e.ward_number;
                    session.store(&patient).map_err(ProjectionError::store)?;
                }
            }
            EncounterEvent::PatientDischarged(e) => {
                session.delete::<Patient>(&e.patient_id.to_string());
            }
        }

        session.save_changes().await.map_err(ProjectionError::store)
    }
}
