use dashmap::DashMap;

use crate::error::SchedulerError;
use crate::job::{Job, JobId};

/// Durable record of live and dead jobs, replayed on start so queued work
/// and outstanding leases survive a restart.
pub trait IJobJournal: Send + Sync {
    fn persist(&self, job: &Job) -> Result<(), SchedulerError>;

    fn remove(&self, id: &JobId) -> Result<(), SchedulerError>;

    fn load(&self) -> Result<Vec<Job>, SchedulerError>;
}

/// In-memory journal. Survives scheduler re-creation within one process.
#[derive(Default)]
pub struct MemoryJournal {
    jobs: DashMap<JobId, Job>,
}

impl MemoryJournal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

impl IJobJournal for MemoryJournal {
    fn persist(&self, job: &Job) -> Result<(), SchedulerError> {
        self.jobs.insert(job.id, job.clone());
        Ok(())
    }

    fn remove(&self, id: &JobId) -> Result<(), SchedulerError> {
        self.jobs.remove(id);
        Ok(())
    }

    fn load(&self) -> Result<Vec<Job>, SchedulerError> {
        let mut jobs: Vec<Job> = self.jobs.iter().map(|e| e.value().clone()).collect();
        jobs.sort_by_key(|j| j.id);
        Ok(jobs)
    }
}
