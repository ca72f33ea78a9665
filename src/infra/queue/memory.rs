//! In-memory job store with per-queue priority lanes.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BinaryHeap, HashMap};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::Value;

use crate::core::error::{EngineError, EngineResult};
use crate::core::job::{AttemptRecord, Job, JobStatus};
use crate::core::store::{EnqueueOutcome, JobStore, StoreStats};
use crate::util::JobId;

/// Ready entry ordered by priority (highest first) and FIFO within a priority.
#[derive(Debug, Clone, Copy)]
struct ReadyEntry {
    rank: crate::util::Priority,
    seq: u64,
    id: JobId,
}

impl PartialEq for ReadyEntry {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ReadyEntry {}

impl PartialOrd for ReadyEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ReadyEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        match self.rank.cmp(&other.rank) {
            // lower sequence number wins (reversed for max-heap)
            Ordering::Equal => other.seq.cmp(&self.seq),
            other => other,
        }
    }
}

/// One queue: jobs not yet due sit in `delayed`, due jobs in `ready`.
///
/// Entries are removed lazily; a popped entry whose job is no longer
/// claimable is skipped.
#[derive(Default)]
struct Lane {
    ready: BinaryHeap<ReadyEntry>,
    delayed: BTreeMap<(DateTime<Utc>, u64), JobId>,
}

impl Lane {
    fn promote_due(&mut self, now: DateTime<Utc>, jobs: &HashMap<JobId, StoredJob>) {
        loop {
            let Some((&(at, seq), &id)) = self.delayed.first_key_value() else {
                break;
            };
            if at > now {
                break;
            }
            self.delayed.remove(&(at, seq));
            if let Some(stored) = jobs.get(&id) {
                self.ready.push(ReadyEntry {
                    rank: stored.job.priority,
                    seq: stored.seq,
                    id,
                });
            }
        }
    }
}

struct StoredJob {
    job: Job,
    seq: u64,
}

#[derive(Default)]
struct State {
    jobs: HashMap<JobId, StoredJob>,
    keys: HashMap<String, JobId>,
    lanes: HashMap<String, Lane>,
    next_seq: u64,
}

impl State {
    fn schedule(&mut self, id: JobId, queue: &str, available_at: DateTime<Utc>, seq: u64) {
        self.lanes
            .entry(queue.to_string())
            .or_default()
            .delayed
            .insert((available_at, seq), id);
    }

    /// Job holding `key` that has not been cancelled or dead-lettered.
    fn live_owner(&self, key: &str) -> Option<JobId> {
        let id = self.keys.get(key).copied()?;
        self.jobs
            .get(&id)
            .filter(|s| !matches!(s.job.status, JobStatus::Cancelled | JobStatus::DeadLettered))
            .map(|_| id)
    }

    fn running_mut(&mut self, id: JobId) -> EngineResult<&mut Job> {
        let stored = self
            .jobs
            .get_mut(&id)
            .ok_or_else(|| EngineError::NotFound(format!("job {id}")))?;
        if stored.job.status != JobStatus::Running {
            return Err(EngineError::InvalidTransition(format!(
                "job {id} is {:?}, expected Running",
                stored.job.status
            )));
        }
        Ok(&mut stored.job)
    }
}

fn close_attempt(job: &mut Job, now: DateTime<Utc>, error: Option<&str>) {
    if let Some(last) = job.history.last_mut() {
        if last.finished_at.is_none() {
            last.finished_at = Some(now);
            last.error = error.map(str::to_string);
        }
    }
}

/// Job store kept in process memory.
///
/// Suitable for a single engine instance and for tests. All operations take one
/// short critical section on a `parking_lot::Mutex`.
#[derive(Default)]
pub struct InMemoryJobStore {
    state: Mutex<State>,
}

impl InMemoryJobStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// All jobs, in no particular order.
    pub fn all(&self) -> Vec<Job> {
        self.state.lock().jobs.values().map(|s| s.job.clone()).collect()
    }
}

impl JobStore for InMemoryJobStore {
    fn enqueue(&self, job: Job) -> EngineResult<EnqueueOutcome> {
        let mut state = self.state.lock();

        if let Some(existing) = job.idempotency_key.as_deref().and_then(|k| state.live_owner(k)) {
            return Ok(EnqueueOutcome::Existing(existing));
        }

        let id = job.id;
        let seq = state.next_seq;
        state.next_seq += 1;
        if let Some(key) = &job.idempotency_key {
            state.keys.insert(key.clone(), id);
        }
        let queue = job.queue.clone();
        let available_at = job.available_at;
        state.jobs.insert(id, StoredJob { job, seq });
        state.schedule(id, &queue, available_at, seq);
        Ok(EnqueueOutcome::Created(id))
    }

    fn claim_next(&self, queue: &str, now: DateTime<Utc>) -> EngineResult<Option<Job>> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let Some(lane) = state.lanes.get_mut(queue) else {
            return Ok(None);
        };
        lane.promote_due(now, &state.jobs);

        while let Some(entry) = lane.ready.pop() {
            let Some(stored) = state.jobs.get_mut(&entry.id) else {
                continue;
            };
            let job = &mut stored.job;
            if !job.status.is_claimable() || job.available_at > now {
                continue;
            }
            job.status = JobStatus::Running;
            job.attempts += 1;
            job.updated_at = now;
            job.history.push(AttemptRecord {
                attempt: job.attempts,
                started_at: now,
                finished_at: None,
                error: None,
            });
            return Ok(Some(job.clone()));
        }
        Ok(None)
    }

    fn complete(&self, id: JobId, result: Value, now: DateTime<Utc>) -> EngineResult<()> {
        let mut state = self.state.lock();
        let job = state.running_mut(id)?;
        job.status = JobStatus::Succeeded;
        job.result = Some(result);
        job.updated_at = now;
        close_attempt(job, now, None);
        Ok(())
    }

    fn reject(&self, id: JobId, reason: &str, now: DateTime<Utc>) -> EngineResult<()> {
        let mut state = self.state.lock();
        let job = state.running_mut(id)?;
        job.status = JobStatus::Rejected;
        job.last_error = Some(reason.to_string());
        job.updated_at = now;
        close_attempt(job, now, Some(reason));
        Ok(())
    }

    fn retry_later(
        &self,
        id: JobId,
        reason: &str,
        available_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> EngineResult<()> {
        let mut state = self.state.lock();
        let job = state.running_mut(id)?;
        job.status = JobStatus::Failed;
        job.last_error = Some(reason.to_string());
        job.available_at = available_at;
        job.updated_at = now;
        close_attempt(job, now, Some(reason));
        let queue = job.queue.clone();
        let seq = state.jobs.get(&id).map_or(0, |s| s.seq);
        state.schedule(id, &queue, available_at, seq);
        Ok(())
    }

    fn dead_letter(&self, id: JobId, reason: &str, now: DateTime<Utc>) -> EngineResult<()> {
        let mut state = self.state.lock();
        let job = state.running_mut(id)?;
        job.status = JobStatus::DeadLettered;
        job.last_error = Some(reason.to_string());
        job.acknowledged = false;
        job.updated_at = now;
        close_attempt(job, now, Some(reason));
        Ok(())
    }

    fn mark_cancelled(&self, id: JobId, reason: &str, now: DateTime<Utc>) -> EngineResult<()> {
        let mut state = self.state.lock();
        let job = state.running_mut(id)?;
        job.status = JobStatus::Cancelled;
        job.last_error = Some(reason.to_string());
        job.updated_at = now;
        close_attempt(job, now, Some(reason));
        Ok(())
    }

    fn request_cancel(&self, id: JobId, now: DateTime<Utc>) -> EngineResult<JobStatus> {
        let mut state = self.state.lock();
        let stored = state
            .jobs
            .get_mut(&id)
            .ok_or_else(|| EngineError::NotFound(format!("job {id}")))?;
        let job = &mut stored.job;
        match job.status {
            JobStatus::Queued | JobStatus::Failed => {
                job.status = JobStatus::Cancelled;
                job.last_error = Some("Cancelled: cancelled by operator".into());
                job.updated_at = now;
            }
            JobStatus::Running => {
                job.cancel_requested = true;
                job.updated_at = now;
            }
            _ => {}
        }
        Ok(job.status)
    }

    fn is_cancel_requested(&self, id: JobId) -> bool {
        self.state
            .lock()
            .jobs
            .get(&id)
            .is_some_and(|s| s.job.cancel_requested)
    }

    fn get(&self, id: JobId) -> EngineResult<Option<Job>> {
        Ok(self.state.lock().jobs.get(&id).map(|s| s.job.clone()))
    }

    fn dead_letters(&self, limit: usize) -> EngineResult<Vec<Job>> {
        let state = self.state.lock();
        let mut dead: Vec<&StoredJob> = state
            .jobs
            .values()
            .filter(|s| s.job.status == JobStatus::DeadLettered && !s.job.acknowledged)
            .collect();
        dead.sort_by_key(|s| (s.job.updated_at, s.seq));
        Ok(dead.into_iter().take(limit).map(|s| s.job.clone()).collect())
    }

    fn acknowledge(&self, id: JobId) -> EngineResult<()> {
        let mut state = self.state.lock();
        let stored = state
            .jobs
            .get_mut(&id)
            .ok_or_else(|| EngineError::NotFound(format!("job {id}")))?;
        if stored.job.status != JobStatus::DeadLettered {
            return Err(EngineError::InvalidTransition(format!(
                "job {id} is not dead-lettered"
            )));
        }
        stored.job.acknowledged = true;
        Ok(())
    }

    fn requeue_dead_letter(&self, id: JobId, now: DateTime<Utc>) -> EngineResult<Job> {
        let mut state = self.state.lock();
        let stored = state
            .jobs
            .get_mut(&id)
            .ok_or_else(|| EngineError::NotFound(format!("job {id}")))?;
        if stored.job.status != JobStatus::DeadLettered {
            return Err(EngineError::InvalidTransition(format!(
                "job {id} is not dead-lettered"
            )));
        }
        if let Some(key) = stored.job.idempotency_key.clone() {
            if let Some(live) = state.live_owner(&key).filter(|owner| *owner != id) {
                if let Some(owner) = state.jobs.get(&live) {
                    return Ok(owner.job.clone());
                }
            }
            state.keys.insert(key, id);
        }
        let Some(stored) = state.jobs.get_mut(&id) else {
            return Err(EngineError::NotFound(format!("job {id}")));
        };
        let seq = stored.seq;
        let job = &mut stored.job;
        job.status = JobStatus::Queued;
        job.attempts = 0;
        job.available_at = now;
        job.updated_at = now;
        job.acknowledged = false;
        let snapshot = job.clone();
        state.schedule(id, &snapshot.queue, now, seq);
        Ok(snapshot)
    }

    fn prune_terminal(&self, older_than: DateTime<Utc>) -> EngineResult<usize> {
        let mut state = self.state.lock();
        let doomed: Vec<JobId> = state
            .jobs
            .values()
            .filter(|s| {
                let job = &s.job;
                job.status.is_terminal()
                    && job.updated_at < older_than
                    && !(job.status == JobStatus::DeadLettered && !job.acknowledged)
            })
            .map(|s| s.job.id)
            .collect();
        for id in &doomed {
            if let Some(stored) = state.jobs.remove(id) {
                if let Some(key) = stored.job.idempotency_key {
                    if state.keys.get(&key) == Some(id) {
                        state.keys.remove(&key);
                    }
                }
            }
        }
        Ok(doomed.len())
    }

    fn depth(&self, queue: &str) -> usize {
        self.state
            .lock()
            .jobs
            .values()
            .filter(|s| s.job.queue == queue && s.job.status.is_claimable())
            .count()
    }

    fn stats(&self) -> StoreStats {
        let state = self.state.lock();
        let mut stats = StoreStats::default();
        for stored in state.jobs.values() {
            *stats.by_status.entry(stored.job.status).or_insert(0) += 1;
        }
        stats
    }
}
