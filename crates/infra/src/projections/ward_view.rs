//! Ward occupancy projection: one document per ward listing its patients.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use carelog_admissions::{EncounterEvent, PatientId};
use carelog_events::{GlobalPosition, Projection, ProjectionError};

use crate::read_model::{Document, DocumentSession, DocumentStore, DocumentStoreError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ward {
    pub id: u32,
    pub patients: BTreeSet<PatientId>,
}

impl Document for Ward {
    const COLLECTION: &'static str = "wards";

    fn document_id(&self) -> String {
        self.id.to_string()
    }
}

/// Maintains [`Ward`] documents. Set semantics make re-application a no-op.
pub struct WardViewProjection {
    documents: Arc<dyn DocumentStore>,
}

impl WardViewProjection {
    pub const NAME: &'static str = "ward_view";

    pub fn new(documents: Arc<dyn DocumentStore>) -> Self {
        Self { documents }
    }
}

async fn load_ward(
    session: &mut DocumentSession<'_>,
    ward_number: u32,
) -> Result<Ward, DocumentStoreError> {
    Ok(session
        .load::<Ward>(&ward_number.to_string())
        .await?
        .unwrap_or(Ward {
            id: ward_number,
            patients: BTreeSet::new(),
        }))
}

async fn remove_from_ward(
    session: &mut DocumentSession<'_>,
    ward_number: u32,
    patient: PatientId,
) -> Result<(), DocumentStoreError> {
    let mut ward = load_ward(session, ward_number).await?;
    ward.patients.remove(&patient);
    if ward.patients.is_empty() {
        session.delete::<Ward>(&ward.document_id());
        Ok(())
    } else {
        session.store(&ward)
    }
}

#[async_trait]
impl Projection for WardViewProjection {
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
                let mut ward = load_ward(&mut session, e.ward_number)
                    .await
                    .map_err(ProjectionError::store)?;
                ward.patients.insert(e.patient_id);
                session.store(&ward).map_err(ProjectionError::store)?;
            }
            EncounterEvent::PatientTransferred(e) => {
                remove_from_ward(&mut session, e.from_ward, e.patient_id)
                    .await
                    .map_err(ProjectionError::store)?;
                let mut ward = load_ward(&mut session, e.ward_number)
                    .await
                    .map_err(ProjectionError::store)?;
                ward.patients.insert(e.patient_id);
                session.store(&ward).map_err(ProjectionError::store)?;
            }
            EncounterEvent::PatientDischarged(e) => {
                remove_from_ward(&mut session, e.ward_number, e.patient_id)
                    .await
                    .map_err(ProjectionError::store)?;
            }
        }

        session.save_changes().await.map_err(ProjectionError::store)
    }
}
