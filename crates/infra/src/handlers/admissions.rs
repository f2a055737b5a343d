use carelog_admissions::{
    AdmitPatient, DischargePatient, Encounter, EncounterCommand, TransferPatient,
};
use carelog_core::EventSourced;
use tokio_util::sync::CancellationToken;

use crate::command_dispatcher::{CommandHandlerMapBuilder, DispatchError};
use crate::repository::AggregateRepository;

/// Register the encounter command handlers.
///
/// Admission creates the stream (`NoStream` expectation, so admitting the same
/// patient twice is a concurrency conflict); transfer and discharge load the
/// encounter first. A command whose token is cancelled before the append
/// fails with [`DispatchError::Cancelled`] and records nothing.
pub fn register_admission_handlers(
    builder: CommandHandlerMapBuilder,
    repository: AggregateRepository,
) -> Result<CommandHandlerMapBuilder, DispatchError> {
    let admit_repo = repository.clone();
    let transfer_repo = repository.clone();
    let discharge_repo = repository;

    builder
        .register(move |cmd: AdmitPatient, ct: CancellationToken| {
            let repository = admit_repo.clone();
            async move {
                let mut encounter = EventSourced::<Encounter>::new(cmd.patient_id.0);
                encounter.execute(&EncounterCommand::Admit(cmd))?;
                save_unless_cancelled(&repository, &mut encounter, &ct).await?;
                Ok::<(), DispatchError>(())
            }
        })?
        .register(move |cmd: TransferPatient, ct: CancellationToken| {
            let repository = transfer_repo.clone();
            async move {
                let mut encounter = repository.get::<Encounter>(cmd.patient_id.0).await?;
                encounter.execute(&EncounterCommand::Transfer(cmd))?;
                save_unless_cancelled(&repository, &mut encounter, &ct).await?;
                Ok::<(), DispatchError>(())
            }
        })?
        .register(move |cmd: DischargePatient, ct: CancellationToken| {
            let repository = discharge_repo.clone();
            async move {
                let mut encounter = repository.get::<Encounter>(cmd.patient_id.0).await?;
                encounter.execute(&EncounterCommand::Discharge(cmd))?;
                save_unless_cancelled(&repository, &mut encounter, &ct).await?;
                Ok::<(), DispatchError>(())
            }
        })
}

async fn save_unless_cancelled(
    repository: &AggregateRepository,
    encounter: &mut EventSourced<Encounter>,
    ct: &CancellationToken,
) -> Result<(), DispatchError> {
    if ct.is_cancelled() {
        return Err(DispatchError::Cancelled);
    }
    repository.save(encounter).await?;
    Ok(())
}
