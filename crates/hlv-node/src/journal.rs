//! Scheduler journal persisted in the `jobs` column family.

use hlv_scheduler::{IJobJournal, Job, JobId, SchedulerError};
use std::sync::Arc;

use crate::storage::{Storage, CF_JOBS};

pub struct RocksJournal {
    storage: Arc<Storage>,
}

fn journal_err(err: impl std::fmt::Display) -> SchedulerError {
    SchedulerError::Journal(err.to_string())
}

impl RocksJournal {
    pub fn new(storage: Arc<Storage>) -> Self {
        Self { storage }
    }
}

impl IJobJournal for RocksJournal {
    fn persist(&self, job: &Job) -> Result<(), SchedulerError> {
        let value = serde_json::to_vec(job).map_err(journal_err)?;
        self.storage
            .put(CF_JOBS, job.id.0.as_bytes(), &value)
            .map_err(journal_err)
    }

    fn remove(&self, id: &JobId) -> Result<(), SchedulerError> {
        self.storage.delete(CF_JOBS, id.0.as_bytes()).map_err(journal_err)
    }

    /// Jobs in id order; ids are time-ordered, so this is enqueue order.
    fn load(&self) -> Result<Vec<Job>, SchedulerError> {
        self.storage
            .scan_all(CF_JOBS)
            .map_err(journal_err)?
            .iter()
            .map(|bytes| serde_json::from_slice(bytes).map_err(journal_err))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::temp_dir;
    use chrono::Utc;
    use hlv_core::{SwapId, SwapStep, SystemClock};
    use hlv_scheduler::{JobKey, JobPayload, Scheduler, SchedulerConfig};

    #[test]
    fn test_persist_load_remove() {
        let dir = temp_dir();
        let journal = RocksJournal::new(Arc::new(Storage::open(&dir).unwrap()));
        let payload = JobPayload::Step {
            swap_id: SwapId::new(),
            step: SwapStep::LockHtlc,
        };
        let priority = payload.default_priority();
        let job = Job::new(payload, priority, Utc::now(), Utc::now());

        journal.persist(&job).unwrap();
        assert_eq!(journal.load().unwrap(), vec![job.clone()]);

        journal.remove(&job.id).unwrap();
        assert!(journal.load().unwrap().is_empty());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_queued_jobs_survive_restart() {
        let dir = temp_dir();
        let swap_id = SwapId::new();
        let key = JobKey::step(swap_id, SwapStep::PayInvoice);
        {
            let storage = Arc::new(Storage::open(&dir).unwrap());
            let scheduler = Scheduler::new(
                SchedulerConfig::default(),
                Arc::new(SystemClock),
                Arc::new(RocksJournal::new(storage)),
            )
            .unwrap();
            scheduler
                .enqueue(JobPayload::Step {
                    swap_id,
                    step: SwapStep::PayInvoice,
                })
                .unwrap();
        }

        let storage = Arc::new(Storage::open(&dir).unwrap());
        let scheduler = Scheduler::new(
            SchedulerConfig::default(),
            Arc::new(SystemClock),
            Arc::new(RocksJournal::new(storage)),
        )
        .unwrap();
        assert!(scheduler.live_job(&key).is_some());
        std::fs::remove_dir_all(&dir).ok();
    }
}
