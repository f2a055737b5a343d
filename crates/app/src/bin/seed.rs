//! Generates admission traffic: a large batch admitted, shuffled between
//! wards and discharged, then a small batch left partly in care.

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use carelog_admissions::{AdmitPatient, DischargePatient, PatientId, TransferPatient};
use carelog_app::{Stores, dispatcher};
use carelog_core::AggregateId;
use carelog_infra::command_dispatcher::{DispatchError, Dispatcher};
use carelog_infra::config::CarelogConfig;

const FIRST_NAMES: &[&str] = &[
    "Ada", "Alan", "Barbara", "Claude", "Donald", "Edsger", "Frances", "Grace", "John", "Katherine",
    "Leslie", "Margaret", "Niklaus", "Radia", "Tony",
];
const LAST_NAMES: &[&str] = &[
    "Allen", "Backus", "Dijkstra", "Hamilton", "Hoare", "Hopper", "Johnson", "Knuth", "Lamport",
    "Liskov", "Lovelace", "Perlman", "Shannon", "Turing", "Wirth",
];
const WARDS: u64 = 100;
const TRANSFER_ROUNDS: u64 = 10;

struct SeedPatient {
    id: PatientId,
    name: String,
    age: u32,
}

/// SplitMix64 step; a fixed seed gives the same traffic on every run.
struct Picker(u64);

impl Picker {
    fn next(&mut self) -> u64 {
        self.0 = self.0.wrapping_add(0x9e37_79b9_7f4a_7c15);
        let mut z = self.0;
        z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
        z ^ (z >> 31)
    }

    fn below(&mut self, n: u64) -> u64 {
        self.next() % n
    }

    fn ward(&mut self) -> u32 {
        (1 + self.below(WARDS)) as u32
    }

    /// One in five.
    fn sometimes(&mut self) -> bool {
        self.below(5) == 0
    }
}

fn generate(picker: &mut Picker, count: usize) -> Vec<SeedPatient> {
    (0..count)
        .map(|_| {
            let first = FIRST_NAMES[picker.below(FIRST_NAMES.len() as u64) as usize];
            let last = LAST_NAMES[picker.below(LAST_NAMES.len() as u64) as usize];
            SeedPatient {
                id: PatientId(AggregateId::new()),
                name: format!("{first} {last}"),
                age: 1 + picker.below(99) as u32,
            }
        })
        .collect()
}

/// Domain refusals (e.g. a transfer to the current ward) are logged and
/// skipped. `Ok(true)` means the command was applied.
fn tolerate(result: Result<(), DispatchError>) -> Result<bool, DispatchError> {
    match result {
        Ok(()) => Ok(true),
        Err(e @ (DispatchError::Validation(_) | DispatchError::InvariantViolation(_))) => {
            warn!(error = %e, "command refused");
            Ok(false)
        }
        Err(e) => Err(e),
    }
}

async fn admit(
    dispatcher: &Dispatcher,
    picker: &mut Picker,
    patients: &[SeedPatient],
    ct: &CancellationToken,
) -> Result<(), DispatchError> {
    for patient in patients {
        dispatcher
            .dispatch(
                AdmitPatient {
                    patient_id: patient.id,
                    patient_name: patient.name.clone(),
                    age_in_years: patient.age,
                    ward_number: picker.ward(),
                    occurred_at: Utc::now(),
                },
                ct.clone(),
            )
            .await?;
    }
    info!(count = patients.len(), "patients admitted");
    Ok(())
}

async fn transfer(
    dispatcher: &Dispatcher,
    picker: &mut Picker,
    patients: &[SeedPatient],
    ct: &CancellationToken,
) -> Result<(), DispatchError> {
    let mut transfers = 0;
    let mut refused = 0;
    for _ in 0..TRANSFER_ROUNDS {
        for patient in patients {
            if !picker.sometimes() {
                continue;
            }
            let command = TransferPatient {
                patient_id: patient.id,
                ward_number: picker.ward(),
                occurred_at: Utc::now(),
            };
            if tolerate(dispatcher.dispatch(command, ct.clone()).await)? {
                transfers += 1;
            } else {
                refused += 1;
            }
        }
    }
    info!(transfers, refused, "transfer rounds done");
    Ok(())
}

async fn discharge(
    dispatcher: &Dispatcher,
    picker: &mut Picker,
    patients: &[SeedPatient],
    all: bool,
    ct: &CancellationToken,
) -> Result<(), DispatchError> {
    let mut discharged = 0;
    let mut refused = 0;
    for patient in patients {
        if !all && !picker.sometimes() {
            continue;
        }
        let command = DischargePatient {
            patient_id: patient.id,
            occurred_at: Utc::now(),
        };
        if tolerate(dispatcher.dispatch(command, ct.clone()).await)? {
            discharged += 1;
        } else {
            refused += 1;
        }
    }
    info!(discharged, refused, "patients discharged");
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    carelog_observability::init();

    let config = CarelogConfig::from_env()?;
    let stores = Stores::from_config(&config).await?;
    let dispatcher = dispatcher(&stores)?;
    let ct = CancellationToken::new();
    let mut picker = Picker(0x00ca_7e10_9000_0001);

    let first = generate(&mut picker, 400);
    admit(&dispatcher, &mut picker, &first, &ct).await?;
    transfer(&dispatcher, &mut picker, &first, &ct).await?;
    discharge(&dispatcher, &mut picker, &first, true, &ct).await?;

    let second = generate(&mut picker, 20);
    admit(&dispatcher, &mut picker, &second, &ct).await?;
    transfer(&dispatcher, &mut picker, &second, &ct).await?;
    discharge(&dispatcher, &mut picker, &second, false, &ct).await?;

    info!("seeding complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_applied_commands_count() {
        assert_eq!(tolerate(Ok(())), Ok(true));
        assert_eq!(
            tolerate(Err(DispatchError::Validation("already in ward 7".to_string()))),
            Ok(false)
        );
        assert_eq!(
            tolerate(Err(DispatchError::InvariantViolation("discharged".to_string()))),
            Ok(false)
        );
        assert_eq!(
            tolerate(Err(DispatchError::Concurrency("stale".to_string()))),
            Err(DispatchError::Concurrency("stale".to_string()))
        );
    }
}
