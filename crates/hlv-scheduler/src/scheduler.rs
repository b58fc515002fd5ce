use chrono::{DateTime, Utc};
use hlv_core::Clock;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

use crate::backoff::chrono_delay_for;
use crate::config::SchedulerConfig;
use crate::error::SchedulerError;
use crate::job::{Job, JobId, JobKey, JobPayload, JobScope, JobState, Lease, PeriodicJob, Priority};
use crate::journal::IJobJournal;

/// Outcome of [`Scheduler::retry`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryOutcome {
    Rescheduled { run_at: DateTime<Utc> },
    DeadLettered,
}

/// Point-in-time job counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    pub queued: usize,
    pub leased: usize,
    pub dead: usize,
}

#[derive(Default)]
struct State {
    jobs: HashMap<JobId, Job>,
    /// Queued or leased job per key.
    live: HashMap<JobKey, JobId>,
    periodic: Vec<PeriodicJob>,
    /// Dead-lettered jobs not yet handed to the caller.
    unreported_dead: Vec<JobId>,
}

impl State {
    fn leased_scopes(&self, now: DateTime<Utc>) -> HashSet<JobScope> {
        self.jobs
            .values()
            .filter(|j| j.is_leased_at(now))
            .map(|j| j.scope())
            .collect()
    }

    fn active_leases(&self, now: DateTime<Utc>) -> usize {
        self.jobs.values().filter(|j| j.is_leased_at(now)).count()
    }
}

/// Job scheduler with single-flight leases per swap.
///
/// All jobs touching one swap share a [`JobScope`]; at most one of them is
/// leased at any instant. Every state change is written to the journal
/// before it takes effect in memory.
pub struct Scheduler {
    config: SchedulerConfig,
    clock: Arc<dyn Clock>,
    journal: Arc<dyn IJobJournal>,
    state: Mutex<State>,
}

impl Scheduler {
    /// Create a scheduler, replaying whatever the journal holds.
    pub fn new(
        config: SchedulerConfig,
        clock: Arc<dyn Clock>,
        journal: Arc<dyn IJobJournal>,
    ) -> Result<Self, SchedulerError> {
        config.validate()?;

        let mut state = State::default();
        for job in journal.load()? {
            if job.is_dead() {
                state.unreported_dead.push(job.id);
            } else {
                state.live.insert(job.key.clone(), job.id);
            }
            state.jobs.insert(job.id, job);
        }
        if !state.jobs.is_empty() {
            tracing::info!(
                jobs = state.jobs.len(),
                dead = state.unreported_dead.len(),
                "scheduler recovered journaled jobs"
            );
        }

        Ok(Self {
            config,
            clock,
            journal,
            state: Mutex::new(state),
        })
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Enqueue `payload` now at its default priority.
    pub fn enqueue(&self, payload: JobPayload) -> Result<JobId, SchedulerError> {
        let priority = payload.default_priority();
        self.enqueue_with(payload, priority, self.clock.now())
    }

    /// Enqueue `payload` to become claimable at `run_at`.
    pub fn enqueue_at(&self, payload: JobPayload, run_at: DateTime<Utc>) -> Result<JobId, SchedulerError> {
        let priority = payload.default_priority();
        self.enqueue_with(payload, priority, run_at)
    }

    /// Enqueue a job, deduplicating on its key.
    ///
    /// A queued job with the same key absorbs the newer payload and the
    /// higher priority, and the earlier run time unless it is backing off
    /// from a failed attempt. A leased one is left untouched.
    pub fn enqueue_with(
        &self,
        payload: JobPayload,
        priority: Priority,
        run_at: DateTime<Utc>,
    ) -> Result<JobId, SchedulerError> {
        let now = self.clock.now();
        let mut state = self.lock();
        let key = JobKey::for_payload(&payload);

        if let Some(id) = state.live.get(&key).copied() {
            if let Some(existing) = state.jobs.get(&id) {
                if existing.state == JobState::Queued {
                    let mut merged = existing.clone();
                    merged.payload = payload;
                    merged.priority = merged.priority.max(priority);
                    if merged.attempts == 0 {
                        merged.run_at = merged.run_at.min(run_at);
                    }
                    merged.updated_at = now;
                    if merged != *existing {
                        self.journal.persist(&merged)?;
                        state.jobs.insert(id, merged);
                    }
                }
                tracing::debug!(job_id = %id, key = %key, "enqueue deduplicated");
                return Ok(id);
            }
        }

        let job = Job::new(payload, priority, run_at, now);
        let id = job.id;
        self.journal.persist(&job)?;
        tracing::debug!(job_id = %id, key = %key, priority = ?priority, "job enqueued");
        state.live.insert(key, id);
        state.jobs.insert(id, job);
        Ok(id)
    }

    /// Claim the live job under `key`.
    ///
    /// Fails with `NotAvailable` when no such job is due or another job of
    /// the same swap holds a lease.
    pub fn claim(&self, key: &JobKey, owner: &str) -> Result<Lease, SchedulerError> {
        let now = self.clock.now();
        let mut state = self.lock();

        let id = state
            .live
            .get(key)
            .copied()
            .ok_or_else(|| SchedulerError::NotAvailable(key.clone()))?;
        let job = state
            .jobs
            .get(&id)
            .ok_or_else(|| SchedulerError::NotAvailable(key.clone()))?;
        if !job.is_claimable_at(now) || state.leased_scopes(now).contains(&job.scope()) {
            return Err(SchedulerError::NotAvailable(key.clone()));
        }
        if state.active_leases(now) >= self.config.max_concurrent_steps {
            return Err(SchedulerError::AtCapacity(self.config.max_concurrent_steps));
        }

        self.grant(&mut state, id, owner, now)?
            .ok_or_else(|| SchedulerError::NotAvailable(key.clone()))
    }

    /// Claim the most urgent due job whose swap is not already leased.
    ///
    /// Returns `None` when nothing is claimable or the ceiling is reached.
    pub fn claim_next(&self, owner: &str) -> Result<Option<Lease>, SchedulerError> {
        let now = self.clock.now();
        let mut state = self.lock();

        if state.active_leases(now) >= self.config.max_concurrent_steps {
            return Ok(None);
        }
        let busy = state.leased_scopes(now);
        let mut candidates: Vec<&Job> = state
            .jobs
            .values()
            .filter(|j| j.is_claimable_at(now) && !busy.contains(&j.scope()))
            .collect();
        candidates.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then(a.run_at.cmp(&b.run_at))
                .then(a.id.cmp(&b.id))
        });
        let ordered: Vec<JobId> = candidates.into_iter().map(|j| j.id).collect();

        for id in ordered {
            if let Some(lease) = self.grant(&mut state, id, owner, now)? {
                return Ok(Some(lease));
            }
        }
        Ok(None)
    }

    /// Lease job `id` to `owner`, or dead-letter it if its attempts are spent.
    fn grant(
        &self,
        state: &mut State,
        id: JobId,
        owner: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Lease>, SchedulerError> {
        let Some(current) = state.jobs.get(&id) else {
            return Ok(None);
        };

        if current.attempts >= self.config.max_attempts {
            let reason = current
                .last_error
                .clone()
                .unwrap_or_else(|| format!("lease expired {} times", current.attempts));
            self.dead_letter(state, id, reason, now)?;
            return Ok(None);
        }

        let mut job = current.clone();
        let token = Uuid::now_v7();
        let expires_at = now + self.config.lease_duration();
        job.attempts += 1;
        job.state = JobState::Leased {
            owner: owner.to_string(),
            token,
            expires_at,
        };
        job.updated_at = now;
        self.journal.persist(&job)?;

        let lease = Lease {
            job_id: id,
            key: job.key.clone(),
            payload: job.payload.clone(),
            owner: owner.to_string(),
            token,
            attempt: job.attempts,
            expires_at,
        };
        tracing::debug!(
            job_id = %id,
            key = %job.key,
            owner,
            attempt = job.attempts,
            "job leased"
        );
        state.jobs.insert(id, job);
        Ok(Some(lease))
    }

    fn dead_letter(
        &self,
        state: &mut State,
        id: JobId,
        reason: String,
        now: DateTime<Utc>,
    ) -> Result<(), SchedulerError> {
        let Some(current) = state.jobs.get(&id) else {
            return Ok(());
        };
        let mut job = current.clone();
        job.state = JobState::Dead {
            reason: reason.clone(),
        };
        job.updated_at = now;
        self.journal.persist(&job)?;

        tracing::warn!(
            job_id = %id,
            key = %job.key,
            attempts = job.attempts,
            reason = %reason,
            "job dead-lettered"
        );
        state.live.remove(&job.key);
        state.jobs.insert(id, job);
        state.unreported_dead.push(id);
        Ok(())
    }

    /// The job behind `lease`, if the lease's token is still the current one.
    ///
    /// A lapsed lease nobody has re-claimed is still honoured.
    fn held<'a>(state: &'a State, lease: &Lease) -> Result<&'a Job, SchedulerError> {
        let job = state
            .jobs
            .get(&lease.job_id)
            .ok_or(SchedulerError::LeaseLost(lease.job_id))?;
        match &job.state {
            JobState::Leased { token, .. } if *token == lease.token => Ok(job),
            _ => Err(SchedulerError::LeaseLost(lease.job_id)),
        }
    }

    /// Extend a lease still in force.
    pub fn renew(&self, lease: &Lease) -> Result<Lease, SchedulerError> {
        let now = self.clock.now();
        let mut state = self.lock();
        let job = Self::held(&state, lease)?;
        if !job.is_leased_at(now) {
            return Err(SchedulerError::LeaseLost(lease.job_id));
        }

        let mut job = job.clone();
        let expires_at = now + self.config.lease_duration();
        job.state = JobState::Leased {
            owner: lease.owner.clone(),
            token: lease.token,
            expires_at,
        };
        job.updated_at = now;
        self.journal.persist(&job)?;
        state.jobs.insert(job.id, job);

        Ok(Lease {
            expires_at,
            ..lease.clone()
        })
    }

    /// Finish the job and release its swap.
    pub fn complete(&self, lease: &Lease) -> Result<(), SchedulerError> {
        let mut state = self.lock();
        let key = Self::held(&state, lease)?.key.clone();
        self.journal.remove(&lease.job_id)?;
        state.jobs.remove(&lease.job_id);
        state.live.remove(&key);
        tracing::debug!(job_id = %lease.job_id, key = %key, "job completed");
        Ok(())
    }

    /// Record a failed attempt: back off, or dead-letter once attempts run out.
    pub fn retry(&self, lease: &Lease, error: &str) -> Result<RetryOutcome, SchedulerError> {
        let now = self.clock.now();
        let mut state = self.lock();
        let mut job = Self::held(&state, lease)?.clone();
        job.last_error = Some(error.to_string());

        if job.attempts >= self.config.max_attempts {
            state.jobs.insert(job.id, job);
            self.dead_letter(&mut state, lease.job_id, error.to_string(), now)?;
            return Ok(RetryOutcome::DeadLettered);
        }

        let run_at = now
            + chrono_delay_for(
                job.attempts,
                self.config.backoff_base_ms,
                self.config.backoff_max_ms,
            );
        job.state = JobState::Queued;
        job.run_at = run_at;
        job.updated_at = now;
        self.journal.persist(&job)?;
        tracing::debug!(
            job_id = %job.id,
            key = %job.key,
            attempt = job.attempts,
            %run_at,
            error,
            "job rescheduled"
        );
        state.jobs.insert(job.id, job);
        Ok(RetryOutcome::Rescheduled { run_at })
    }

    /// Put the job back for `run_at` without spending an attempt.
    ///
    /// For guards that are not yet met rather than failures.
    pub fn defer(&self, lease: &Lease, run_at: DateTime<Utc>) -> Result<(), SchedulerError> {
        let now = self.clock.now();
        let mut state = self.lock();
        let mut job = Self::held(&state, lease)?.clone();
        job.attempts = job.attempts.saturating_sub(1);
        job.state = JobState::Queued;
        job.run_at = run_at;
        job.updated_at = now;
        self.journal.persist(&job)?;
        state.jobs.insert(job.id, job);
        Ok(())
    }

    /// Keep the lease as is but remember why its outcome is unknown, so a
    /// dead letter raised when it lapses carries that reason.
    pub fn note_unknown(&self, lease: &Lease, reason: &str) -> Result<(), SchedulerError> {
        let now = self.clock.now();
        let mut state = self.lock();
        let mut job = Self::held(&state, lease)?.clone();
        job.last_error = Some(reason.to_string());
        job.updated_at = now;
        self.journal.persist(&job)?;
        state.jobs.insert(job.id, job);
        Ok(())
    }

    /// Register a recurring enqueue of `payload`, first due immediately.
    pub fn register_periodic(&self, payload: JobPayload, every: chrono::Duration) {
        let now = self.clock.now();
        let mut state = self.lock();
        state.periodic.retain(|p| p.payload != payload);
        state.periodic.push(PeriodicJob {
            payload,
            every,
            next_at: now,
        });
    }

    /// Enqueue every periodic job that has come due. Returns how many fired.
    pub fn enqueue_due_periodic(&self) -> Result<usize, SchedulerError> {
        let now = self.clock.now();
        let due: Vec<JobPayload> = {
            let mut state = self.lock();
            state
                .periodic
                .iter_mut()
                .filter(|p| p.next_at <= now)
                .map(|p| {
                    p.next_at = now + p.every;
                    p.payload.clone()
                })
                .collect()
        };
        for payload in &due {
            self.enqueue(payload.clone())?;
        }
        Ok(due.len())
    }

    /// Dead-lettered jobs not yet returned by a previous call.
    pub fn take_dead_letters(&self) -> Vec<Job> {
        let mut state = self.lock();
        let ids = std::mem::take(&mut state.unreported_dead);
        ids.iter()
            .filter_map(|id| state.jobs.get(id).cloned())
            .collect()
    }

    pub fn dead_letters(&self) -> Vec<Job> {
        let state = self.lock();
        let mut dead: Vec<Job> = state.jobs.values().filter(|j| j.is_dead()).cloned().collect();
        dead.sort_by_key(|j| j.id);
        dead
    }

    pub fn get(&self, id: &JobId) -> Option<Job> {
        self.lock().jobs.get(id).cloned()
    }

    /// The queued or leased job under `key`.
    pub fn live_job(&self, key: &JobKey) -> Option<Job> {
        let state = self.lock();
        state.live.get(key).and_then(|id| state.jobs.get(id)).cloned()
    }

    /// Earliest instant something becomes claimable or a periodic job fires.
    pub fn next_due_at(&self) -> Option<DateTime<Utc>> {
        let state = self.lock();
        let jobs = state.jobs.values().filter_map(|j| match &j.state {
            JobState::Queued => Some(j.run_at),
            JobState::Leased { expires_at, .. } => Some(*expires_at),
            JobState::Dead { .. } => None,
        });
        let periodic = state.periodic.iter().map(|p| p.next_at);
        jobs.chain(periodic).min()
    }

    pub fn stats(&self) -> SchedulerStats {
        let now = self.clock.now();
        let state = self.lock();
        let mut stats = SchedulerStats::default();
        for job in state.jobs.values() {
            if job.is_dead() {
                stats.dead += 1;
            } else if job.is_leased_at(now) {
                stats.leased += 1;
            } else {
                stats.queued += 1;
            }
        }
        stats
    }
}
