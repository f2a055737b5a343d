//! Walks one patient through admission, two transfers and discharge.

use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use carelog_admissions::{AdmitPatient, DischargePatient, PatientId, TransferPatient};
use carelog_app::{Stores, dispatcher, start_projections};
use carelog_core::AggregateId;
use carelog_infra::config::CarelogConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    carelog_observability::init();

    let config = CarelogConfig::from_env()?;
    let stores = Stores::from_config(&config).await?;
    let dispatcher = dispatcher(&stores)?;
    let ct = CancellationToken::new();

    // Without a database nobody else is projecting, so do it in-process.
    let projections = match config.database_url {
        Some(_) => None,
        None => Some(start_projections(&stores, &config, ct.clone()).await?),
    };

    let patient_id = PatientId(AggregateId::new());
    tracing::info!(%patient_id, "admitting demo patient");

    dispatcher
        .dispatch(
            AdmitPatient {
                patient_id,
                patient_name: "Tony Ferguson".to_string(),
                age_in_years: 32,
                ward_number: 10,
                occurred_at: Utc::now(),
            },
            ct.clone(),
        )
        .await?;

    for ward_number in [76, 34] {
        dispatcher
            .dispatch(
                TransferPatient {
                    patient_id,
                    ward_number,
                    occurred_at: Utc::now(),
                },
                ct.clone(),
            )
            .await?;
        tracing::info!(%patient_id, ward_number, "patient transferred");
    }

    dispatcher
        .dispatch(
            DischargePatient {
                patient_id,
                occurred_at: Utc::now(),
            },
            ct.clone(),
        )
        .await?;
    tracing::info!(%patient_id, "patient discharged");

    if let Some(handle) = projections {
        tokio::time::sleep(Duration::from_millis(200)).await;
        for status in handle.statuses() {
            tracing::info!(
                projection = %status.projection,
                checkpoint = ?status.checkpoint,
                "projection status"
            );
        }
        handle.shutdown().await;
    }
    Ok(())
}
