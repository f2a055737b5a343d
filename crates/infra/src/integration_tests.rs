//! Integration tests for the full event-sourced pipeline.
//!
//! Tests: Command → Dispatcher → Repository → EventStore → ProjectionManager → Documents
//!
//! Verifies:
//! - Admissions, transfers and discharges reach both read models
//! - Projections recover from dropped subscriptions and store outages
//! - Optimistic concurrency conflicts are detected

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::sync::Arc;
    use std::time::Duration;

    use chrono::Utc;
    use tokio_util::sync::CancellationToken;

    use carelog_admissions::{
        AdmitPatient, DischargePatient, Encounter, EncounterCommand, PatientId, TransferPatient,
    };
    use carelog_core::{AggregateId, EventSourced, ExpectedVersion};
    use carelog_events::{DropReason, GlobalPosition};

    use crate::command_dispatcher::{CommandHandlerMap, DispatchError, Dispatcher};
    use crate::event_store::{EventStore, InMemoryEventStore};
    use crate::handlers::register_admission_handlers;
    use crate::projections::{
        CheckpointStore, Patient, PatientDemographicsProjection, Ward, WardViewProjection,
    };
    use crate::read_model::{DocumentSession, InMemoryDocumentStore};
    use crate::repository::{AggregateRepository, RepositoryError};
    use crate::workers::{
        CheckpointPolicy, ProjectionManager, ProjectionManagerConfig, ProjectionManagerHandle,
        SubscriptionPhase, SubscriptionState,
    };

    struct Harness {
        events: Arc<InMemoryEventStore>,
        documents: Arc<InMemoryDocumentStore>,
        dispatcher: Dispatcher,
        repository: AggregateRepository,
    }

    impl Harness {
        fn new() -> Self {
            let events = Arc::new(InMemoryEventStore::new());
            let documents = Arc::new(InMemoryDocumentStore::new());
            let store: Arc<dyn EventStore> = events.clone();
            let repository = AggregateRepository::new(store);
            let map = register_admission_handlers(CommandHandlerMap::builder(), repository.clone())
                .unwrap()
                .build();

            Self {
                events,
                documents,
                dispatcher: Dispatcher::new(map),
                repository,
            }
        }

        async fn start_projections(&self) -> ProjectionManagerHandle {
            let config = ProjectionManagerConfig {
                resubscribe_delay: Duration::from_millis(20),
                checkpoint_policy: CheckpointPolicy::EveryEvent,
            };
            ProjectionManager::new(self.events.clone(), self.documents.clone(), config)
                .register(PatientDemographicsProjection::new(self.documents.clone()))
                .unwrap()
                .register(WardViewProjection::new(self.documents.clone()))
                .unwrap()
                .start(CancellationToken::new())
                .await
                .unwrap()
        }

        async fn admit(&self, id: PatientId, name: &str, ward: u32) -> Result<(), DispatchError> {
            self.dispatcher
                .dispatch(
                    AdmitPatient {
                        patient_id: id,
                        patient_name: name.to_string(),
                        age_in_years: 42,
                        ward_number: ward,
                        occurred_at: Utc::now(),
                    },
                    CancellationToken::new(),
                )
                .await
        }

        async fn transfer(&self, id: PatientId, ward: u32) -> Result<(), DispatchError> {
            self.dispatcher
                .dispatch(
                    TransferPatient {
                        patient_id: id,
                        ward_number: ward,
                        occurred_at: Utc::now(),
                    },
                    CancellationToken::new(),
                )
                .await
        }

        async fn discharge(&self, id: PatientId) -> Result<(), DispatchError> {
            self.dispatcher
                .dispatch(
                    DischargePatient {
                        patient_id: id,
                        occurred_at: Utc::now(),
                    },
                    CancellationToken::new(),
                )
                .await
        }

        async fn patient(&self, id: PatientId) -> Option<Patient> {
            DocumentSession::open(self.documents.as_ref())
                .load::<Patient>(&id.to_string())
                .await
                .unwrap()
        }

        async fn ward(&self, number: u32) -> Option<Ward> {
            DocumentSession::open(self.documents.as_ref())
                .load::<Ward>(&number.to_string())
                .await
                .unwrap()
        }

        fn head(&self) -> GlobalPosition {
            self.events
                .all_events()
                .last()
                .map(|e| e.position)
                .unwrap_or(GlobalPosition::new(0, 0))
        }
    }

    fn new_patient() -> PatientId {
        PatientId(AggregateId::new())
    }

    /// Wait until every projection has checkpointed the head of the log.
    async fn settle(harness: &Harness, handle: &ProjectionManagerHandle) {
        let head = harness.head();
        for projection in [PatientDemographicsProjection::NAME, WardViewProjection::NAME] {
            let mut rx = handle.watch(projection).unwrap();
            let _ = tokio::time::timeout(
                Duration::from_secs(5),
                rx.wait_for(|s| s.checkpoint >= Some(head)),
            )
            .await
            .expect("projection did not catch up")
            .unwrap();
        }
    }

    #[tokio::test]
    async fn admission_transfer_and_discharge_reach_the_read_models() {
        let harness = Harness::new();
        let handle = harness.start_projections().await;
        let id = new_patient();

        harness.admit(id, "Ada Lovelace", 12).await.unwrap();
        settle(&harness, &handle).await;
        let patient = harness.patient(id).await.unwrap();
        assert_eq!(patient.patient_name, "Ada Lovelace");
        assert_eq!(patient.ward_number, 12);
        assert_eq!(harness.ward(12).await.unwrap().patients, BTreeSet::from([id]));

        harness.transfer(id, 76).await.unwrap();
        harness.transfer(id, 34).await.unwrap();
        settle(&harness, &handle).await;
        assert_eq!(harness.patient(id).await.unwrap().ward_number, 34);
        assert_eq!(harness.ward(12).await, None);
        assert_eq!(harness.ward(76).await, None);
        assert_eq!(harness.ward(34).await.unwrap().patients, BTreeSet::from([id]));

        harness.discharge(id).await.unwrap();
        settle(&harness, &handle).await;
        assert_eq!(harness.patient(id).await, None);
        assert_eq!(harness.ward(34).await, None);

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn projections_started_late_catch_up_on_history() {
        let harness = Harness::new();
        let a = new_patient();
        let b = new_patient();
        harness.admit(a, "Alan Turing", 5).await.unwrap();
        harness.admit(b, "Grace Hopper", 5).await.unwrap();
        harness.transfer(b, 6).await.unwrap();

        let handle = harness.start_projections().await;
        settle(&harness, &handle).await;

        assert_eq!(harness.ward(5).await.unwrap().patients, BTreeSet::from([a]));
        assert_eq!(harness.ward(6).await.unwrap().patients, BTreeSet::from([b]));
        assert!(matches!(
            handle.status(WardViewProjection::NAME).unwrap().state,
            SubscriptionState::Subscribed(_)
        ));
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn restart_resumes_from_checkpoints_without_duplicating_effects() {
        let harness = Harness::new();
        let a = new_patient();
        harness.admit(a, "Barbara Liskov", 3).await.unwrap();

        let handle = harness.start_projections().await;
        settle(&harness, &handle).await;
        handle.shutdown().await;

        let b = new_patient();
        harness.admit(b, "Edsger Dijkstra", 3).await.unwrap();

        let handle = harness.start_projections().await;
        settle(&harness, &handle).await;

        assert_eq!(harness.ward(3).await.unwrap().patients, BTreeSet::from([a, b]));
        assert_eq!(harness.documents.collection("patients").len(), 2);
        let checkpoint = CheckpointStore::new(harness.documents.clone())
            .load(WardViewProjection::NAME)
            .await
            .unwrap();
        assert_eq!(checkpoint, Some(harness.head()));
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn dropped_subscriptions_recover_and_keep_projecting() {
        let harness = Harness::new();
        let handle = harness.start_projections().await;
        let id = new_patient();
        harness.admit(id, "Katherine Johnson", 8).await.unwrap();
        settle(&harness, &handle).await;

        harness.events.fail_next_subscribes(1);
        harness.events.drop_subscriptions(DropReason::ServerError);
        harness.transfer(id, 9).await.unwrap();
        settle(&harness, &handle).await;

        assert_eq!(harness.patient(id).await.unwrap().ward_number, 9);
        assert_eq!(harness.ward(9).await.unwrap().patients, BTreeSet::from([id]));
        for status in handle.statuses() {
            assert!(status.resubscriptions >= 1, "{status:?}");
        }
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn read_model_outage_delays_but_does_not_lose_events() {
        let harness = Harness::new();
        let handle = harness.start_projections().await;
        let mut rx = handle.watch(PatientDemographicsProjection::NAME).unwrap();
        let _ = tokio::time::timeout(
            Duration::from_secs(5),
            rx.wait_for(|s| s.state == SubscriptionState::Subscribed(SubscriptionPhase::Live)),
        )
        .await
        .unwrap()
        .unwrap();

        harness.documents.set_available(false);
        let id = new_patient();
        harness.admit(id, "Margaret Hamilton", 2).await.unwrap();
        let _ = tokio::time::timeout(
            Duration::from_secs(5),
            rx.wait_for(|s| s.state == SubscriptionState::Resubscribing),
        )
        .await
        .unwrap()
        .unwrap();

        harness.documents.set_available(true);
        settle(&harness, &handle).await;
        assert_eq!(harness.patient(id).await.unwrap().ward_number, 2);
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn domain_failures_come_back_from_dispatch() {
        let harness = Harness::new();
        let id = new_patient();

        assert!(matches!(
            harness.transfer(id, 4).await,
            Err(DispatchError::NotFound(_))
        ));

        harness.admit(id, "Frances Allen", 4).await.unwrap();
        assert!(matches!(
            harness.admit(id, "Frances Allen", 4).await,
            Err(DispatchError::Concurrency(_))
        ));
        assert!(matches!(
            harness.transfer(id, 4).await,
            Err(DispatchError::Validation(_))
        ));

        harness.discharge(id).await.unwrap();
        assert!(matches!(
            harness.discharge(id).await,
            Err(DispatchError::InvariantViolation(_))
        ));
        assert_eq!(harness.events.all_events().len(), 2);
    }

    #[tokio::test]
    async fn stale_aggregate_version_is_rejected() {
        let harness = Harness::new();
        let id = new_patient();
        harness.admit(id, "John Backus", 1).await.unwrap();

        let mut first = harness.repository.get::<Encounter>(id.0).await.unwrap();
        let mut second: EventSourced<Encounter> = harness.repository.get(id.0).await.unwrap();

        first
            .execute(&EncounterCommand::Transfer(TransferPatient {
                patient_id: id,
                ward_number: 2,
                occurred_at: Utc::now(),
            }))
            .unwrap();
        assert_eq!(harness.repository.save(&mut first).await.unwrap(), 2);

        second
            .execute(&EncounterCommand::Transfer(TransferPatient {
                patient_id: id,
                ward_number: 3,
                occurred_at: Utc::now(),
            }))
            .unwrap();
        let err = harness.repository.save(&mut second).await.unwrap_err();
        assert!(matches!(
            err,
            RepositoryError::Concurrency {
                expected: ExpectedVersion::Exact(1),
                actual: 2,
                ..
            }
        ));
        assert_eq!(
            harness.repository.get::<Encounter>(id.0).await.unwrap().state().ward_number(),
            2
        );
    }
}
