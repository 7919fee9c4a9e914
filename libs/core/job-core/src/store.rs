//! The Job Store (§4.A): durable job records, FIFO queues per job type,
//! and a delayed/due-time index for scheduled retries.
//!
//! The Redis-backed implementation keeps three kinds of keys per store
//! instance (all prefixed with `key_prefix`, default `jobs:`):
//! - `{prefix}job:{id}` — a hash with a single `json` field holding the
//!   job record, schema-encoded via `serde_json` (no type tags, §9).
//! - `{prefix}queue:{queue_name}` — a list used as a FIFO (RPUSH / LPOP).
//! - `{prefix}delayed:{queue_name}` — a sorted set scored by due-time
//!   (epoch millis), holding jobs not yet eligible for dispatch.
//! - `{prefix}idx:user:{user_id}` / `{prefix}idx:state:{state}` — index
//!   sets kept in lock-step with each job's current state, so
//!   `list_by_user`/`list_by_state` avoid a full keyspace scan.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Script};
use thiserror::Error;
use tokio::sync::RwLock;

use crate::job::{Job, JobState};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("job not found: {0}")]
    NotFound(String),
    #[error("compare-and-swap failed: job {0} was not in the expected state")]
    CasMismatch(String),
}

/// Aggregate counts for the admin/health surface (§6).
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct QueueStats {
    pub queued_by_queue: HashMap<String, u64>,
    pub delayed_by_queue: HashMap<String, u64>,
    pub by_state: HashMap<String, u64>,
}

/// Per-queue stats exposed to the job-service façade's operator interface
/// (§4.A, §6): `{queueName, size, oldestJobCreatedAt}`.
#[derive(Debug, Clone, serde::Serialize)]
pub struct SingleQueueStats {
    pub queue_name: String,
    pub size: u64,
    pub oldest_job_created_at: Option<chrono::DateTime<Utc>>,
}

/// The Job Store contract (§4.A). Implementations must guarantee:
/// - `put_new` and `cas_update` are atomic w.r.t. each other for the same id.
/// - `pop_next` hands a given job to at most one caller (I2: at-most-once
///   completion).
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn put_new(&self, job: Job) -> Result<(), StoreError>;

    async fn get(&self, id: &str) -> Result<Option<Job>, StoreError>;

    /// Atomically verify `job.state == expected_state`, apply `mutate`, and
    /// persist the result. Returns `CasMismatch` if another writer already
    /// moved the job out of `expected_state`.
    async fn cas_update(
        &self,
        id: &str,
        expected_state: JobState,
        mutate: Box<dyn FnOnce(&mut Job) + Send>,
    ) -> Result<Job, StoreError>;

    /// Atomically pop the head of `queue_name`'s FIFO and mark it
    /// `processing`. Returns `None` if the queue is empty.
    async fn pop_next(&self, queue_name: &str) -> Result<Option<Job>, StoreError>;

    async fn list_by_user(&self, user_id: &str) -> Result<Vec<Job>, StoreError>;

    async fn list_by_state(&self, state: JobState) -> Result<Vec<Job>, StoreError>;

    /// Park a job in the delayed index, due at `job.next_eligible_at`.
    async fn enqueue_delayed(&self, job: Job) -> Result<(), StoreError>;

    /// Move every job in `queue_name`'s delayed index whose due-time has
    /// passed onto that queue's FIFO. Returns the number promoted.
    async fn promote_due(&self, queue_name: &str) -> Result<u64, StoreError>;

    async fn stats(&self) -> Result<QueueStats, StoreError>;

    /// Size and oldest-job age of a single ready queue (§4.A: `stats(queue)
    /// → {size, oldest_age}`).
    async fn queue_stats(&self, queue_name: &str) -> Result<SingleQueueStats, StoreError>;

    /// Delete terminal jobs (completed/failed/cancelled) whose
    /// `completed_at` is older than `retention`. Returns the number removed.
    async fn cleanup_terminal(&self, retention: chrono::Duration) -> Result<u64, StoreError>;
}

fn job_key(prefix: &str, id: &str) -> String {
    format!("{prefix}job:{id}")
}

fn queue_key(prefix: &str, queue_name: &str) -> String {
    format!("{prefix}queue:{queue_name}")
}

fn delayed_key(prefix: &str, queue_name: &str) -> String {
    format!("{prefix}delayed:{queue_name}")
}

fn user_index_key(prefix: &str, user_id: &str) -> String {
    format!("{prefix}idx:user:{user_id}")
}

fn state_index_key(prefix: &str, state: JobState) -> String {
    format!("{prefix}idx:state:{}", state.as_str())
}

/// Redis-backed `JobStore`.
pub struct RedisJobStore {
    conn: ConnectionManager,
    key_prefix: String,
    cas_script: Script,
    pop_script: Script,
}

impl RedisJobStore {
    pub fn new(conn: ConnectionManager, key_prefix: impl Into<String>) -> Self {
        Self {
            conn,
            key_prefix: key_prefix.into(),
            // KEYS[1] = job hash key, ARGV[1] = expected state,
            // ARGV[2] = new json, ARGV[3] = new state.
            cas_script: Script::new(
                r#"
                local current = redis.call('HGET', KEYS[1], 'json')
                if current == false then
                    return redis.error_reply('not_found')
                end
                local state = cjson.decode(current)['state']
                if state ~= ARGV[1] then
                    return redis.error_reply('cas_mismatch')
                end
                redis.call('HSET', KEYS[1], 'json', ARGV[2])
                return 'OK'
                "#,
            ),
            // KEYS[1] = queue list key, ARGV none. Pops and returns the
            // raw job id string, or false if empty. Claiming (marking
            // processing) happens in Rust via a follow-up cas_update so
            // the state-transition logic stays in one place.
            pop_script: Script::new(
                r#"
                return redis.call('LPOP', KEYS[1])
                "#,
            ),
        }
    }

    async fn store_job_record(&self, job: &Job) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let json = serde_json::to_string(job)?;
        let key = job_key(&self.key_prefix, &job.id);
        let _: () = conn.hset(&key, "json", json).await?;
        Ok(())
    }

    async fn add_to_indexes(&self, job: &Job) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _: () = conn
            .sadd(user_index_key(&self.key_prefix, &job.user_id), &job.id)
            .await?;
        let _: () = conn
            .sadd(state_index_key(&self.key_prefix, job.state), &job.id)
            .await?;
        Ok(())
    }

    async fn move_state_index(
        &self,
        id: &str,
        from: JobState,
        to: JobState,
    ) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _: () = conn
            .srem(state_index_key(&self.key_prefix, from), id)
            .await?;
        let _: () = conn.sadd(state_index_key(&self.key_prefix, to), id).await?;
        Ok(())
    }
}

#[async_trait]
impl JobStore for RedisJobStore {
    async fn put_new(&self, job: Job) -> Result<(), StoreError> {
        self.store_job_record(&job).await?;
        self.add_to_indexes(&job).await?;

        let mut conn = self.conn.clone();
        if job.next_eligible_at <= Utc::now() {
            let _: () = conn
                .rpush(queue_key(&self.key_prefix, &job.queue_name), &job.id)
                .await?;
        } else {
            let score = job.next_eligible_at.timestamp_millis();
            let _: () = conn
                .zadd(
                    delayed_key(&self.key_prefix, &job.queue_name),
                    &job.id,
                    score,
                )
                .await?;
        }
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<Job>, StoreError> {
        let mut conn = self.conn.clone();
        let json: Option<String> = conn.hget(job_key(&self.key_prefix, id), "json").await?;
        match json {
            Some(j) => Ok(Some(serde_json::from_str(&j)?)),
            None => Ok(None),
        }
    }

    async fn cas_update(
        &self,
        id: &str,
        expected_state: JobState,
        mutate: Box<dyn FnOnce(&mut Job) + Send>,
    ) -> Result<Job, StoreError> {
        let mut job = self
            .get(id)
            .await?
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        if job.state != expected_state {
            return Err(StoreError::CasMismatch(id.to_string()));
        }

        let before_state = job.state;
        mutate(&mut job);
        let new_json = serde_json::to_string(&job)?;

        let mut conn = self.conn.clone();
        let result: redis::RedisResult<String> = self
            .cas_script
            .key(job_key(&self.key_prefix, id))
            .arg(expected_state.as_str())
            .arg(&new_json)
            .invoke_async(&mut conn)
            .await;

        match result {
            Ok(_) => {
                if job.state != before_state {
                    self.move_state_index(id, before_state, job.state).await?;
                }
                Ok(job)
            }
            Err(e) if e.to_string().contains("cas_mismatch") => {
                Err(StoreError::CasMismatch(id.to_string()))
            }
            Err(e) if e.to_string().contains("not_found") => {
                Err(StoreError::NotFound(id.to_string()))
            }
            Err(e) => Err(StoreError::Redis(e)),
        }
    }

    async fn pop_next(&self, queue_name: &str) -> Result<Option<Job>, StoreError> {
        let mut conn = self.conn.clone();
        let id: Option<String> = self
            .pop_script
            .key(queue_key(&self.key_prefix, queue_name))
            .invoke_async(&mut conn)
            .await?;

        let Some(id) = id else {
            return Ok(None);
        };

        let job = self
            .cas_update(
                &id,
                JobState::Queued,
                Box::new(|job| job.mark_processing()),
            )
            .await?;
        Ok(Some(job))
    }

    async fn list_by_user(&self, user_id: &str) -> Result<Vec<Job>, StoreError> {
        let mut conn = self.conn.clone();
        let ids: Vec<String> = conn.smembers(user_index_key(&self.key_prefix, user_id)).await?;
        self.fetch_many(&ids).await
    }

    async fn list_by_state(&self, state: JobState) -> Result<Vec<Job>, StoreError> {
        let mut conn = self.conn.clone();
        let ids: Vec<String> = conn.smembers(state_index_key(&self.key_prefix, state)).await?;
        self.fetch_many(&ids).await
    }

    async fn enqueue_delayed(&self, job: Job) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let score = job.next_eligible_at.timestamp_millis();
        let _: () = conn
            .zadd(
                delayed_key(&self.key_prefix, &job.queue_name),
                &job.id,
                score,
            )
            .await?;
        self.store_job_record(&job).await?;
        Ok(())
    }

    async fn promote_due(&self, queue_name: &str) -> Result<u64, StoreError> {
        let mut conn = self.conn.clone();
        let now = Utc::now().timestamp_millis();
        let dkey = delayed_key(&self.key_prefix, queue_name);

        let due: Vec<String> = conn.zrangebyscore(&dkey, 0, now).await?;
        if due.is_empty() {
            return Ok(0);
        }

        let mut pipe = redis::pipe();
        pipe.atomic();
        for id in &due {
            pipe.zrem(&dkey, id).ignore();
            pipe.rpush(queue_key(&self.key_prefix, queue_name), id).ignore();
        }
        let _: () = pipe.query_async(&mut conn).await?;
        Ok(due.len() as u64)
    }

    async fn stats(&self) -> Result<QueueStats, StoreError> {
        let mut conn = self.conn.clone();
        let mut stats = QueueStats::default();

        for state in [
            JobState::Queued,
            JobState::Processing,
            JobState::Completed,
            JobState::Failed,
            JobState::Cancelled,
        ] {
            let count: u64 = conn.scard(state_index_key(&self.key_prefix, state)).await?;
            stats.by_state.insert(state.as_str().to_string(), count);
        }

        Ok(stats)
    }

    async fn queue_stats(&self, queue_name: &str) -> Result<SingleQueueStats, StoreError> {
        let mut conn = self.conn.clone();
        let qkey = queue_key(&self.key_prefix, queue_name);
        let size: u64 = conn.llen(&qkey).await?;

        let oldest_job_created_at = if size == 0 {
            None
        } else {
            let head_id: Option<String> = conn.lindex(&qkey, 0).await?;
            match head_id {
                Some(id) => self.get(&id).await?.map(|job| job.created_at),
                None => None,
            }
        };

        Ok(SingleQueueStats {
            queue_name: queue_name.to_string(),
            size,
            oldest_job_created_at,
        })
    }

    async fn cleanup_terminal(&self, retention: chrono::Duration) -> Result<u64, StoreError> {
        let cutoff = Utc::now() - retention;
        let mut removed = 0u64;

        for state in [JobState::Completed, JobState::Failed, JobState::Cancelled] {
            let jobs = self.list_by_state(state).await?;
            for job in jobs {
                if job.completed_at.map(|t| t < cutoff).unwrap_or(false) {
                    let mut conn = self.conn.clone();
                    let _: () = conn.del(job_key(&self.key_prefix, &job.id)).await?;
                    let _: () = conn
                        .srem(state_index_key(&self.key_prefix, state), &job.id)
                        .await?;
                    let _: () = conn
                        .srem(user_index_key(&self.key_prefix, &job.user_id), &job.id)
                        .await?;
                    removed += 1;
                }
            }
        }
        Ok(removed)
    }
}

impl RedisJobStore {
    async fn fetch_many(&self, ids: &[String]) -> Result<Vec<Job>, StoreError> {
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(job) = self.get(id).await? {
                out.push(job);
            }
        }
        Ok(out)
    }
}

/// In-process `JobStore` used by unit tests and local development, backed
/// by a single `RwLock<HashMap>`. Not durable across restarts.
#[derive(Default)]
pub struct InMemoryJobStore {
    jobs: Arc<RwLock<HashMap<String, Job>>>,
    queues: Arc<RwLock<HashMap<String, Vec<String>>>>,
    delayed: Arc<RwLock<HashMap<String, Vec<String>>>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn put_new(&self, job: Job) -> Result<(), StoreError> {
        let due_now = job.next_eligible_at <= Utc::now();
        let queue_name = job.queue_name.clone();
        let id = job.id.clone();
        self.jobs.write().await.insert(id.clone(), job);
        if due_now {
            self.queues.write().await.entry(queue_name).or_default().push(id);
        } else {
            self.delayed.write().await.entry(queue_name).or_default().push(id);
        }
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<Job>, StoreError> {
        Ok(self.jobs.read().await.get(id).cloned())
    }

    async fn cas_update(
        &self,
        id: &str,
        expected_state: JobState,
        mutate: Box<dyn FnOnce(&mut Job) + Send>,
    ) -> Result<Job, StoreError> {
        let mut jobs = self.jobs.write().await;
        let job = jobs
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        if job.state != expected_state {
            return Err(StoreError::CasMismatch(id.to_string()));
        }
        mutate(job);
        Ok(job.clone())
    }

    async fn pop_next(&self, queue_name: &str) -> Result<Option<Job>, StoreError> {
        let id = {
            let mut queues = self.queues.write().await;
            let Some(q) = queues.get_mut(queue_name) else {
                return Ok(None);
            };
            if q.is_empty() {
                return Ok(None);
            }
            q.remove(0)
        };
        let job = self
            .cas_update(&id, JobState::Queued, Box::new(|job| job.mark_processing()))
            .await?;
        Ok(Some(job))
    }

    async fn list_by_user(&self, user_id: &str) -> Result<Vec<Job>, StoreError> {
        Ok(self
            .jobs
            .read()
            .await
            .values()
            .filter(|j| j.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn list_by_state(&self, state: JobState) -> Result<Vec<Job>, StoreError> {
        Ok(self
            .jobs
            .read()
            .await
            .values()
            .filter(|j| j.state == state)
            .cloned()
            .collect())
    }

    async fn enqueue_delayed(&self, job: Job) -> Result<(), StoreError> {
        let queue_name = job.queue_name.clone();
        let id = job.id.clone();
        self.jobs.write().await.insert(id.clone(), job);
        self.delayed.write().await.entry(queue_name).or_default().push(id);
        Ok(())
    }

    async fn promote_due(&self, queue_name: &str) -> Result<u64, StoreError> {
        let now = Utc::now();
        let mut delayed = self.delayed.write().await;
        let Some(pending) = delayed.get_mut(queue_name) else {
            return Ok(0);
        };

        let jobs = self.jobs.read().await;
        let (due, not_due): (Vec<String>, Vec<String>) = pending.drain(..).partition(|id| {
            jobs.get(id)
                .map(|j| j.next_eligible_at <= now)
                .unwrap_or(false)
        });
        drop(jobs);
        *pending = not_due;

        let count = due.len() as u64;
        self.queues
            .write()
            .await
            .entry(queue_name.to_string())
            .or_default()
            .extend(due);
        Ok(count)
    }

    async fn stats(&self) -> Result<QueueStats, StoreError> {
        let jobs = self.jobs.read().await;
        let mut stats = QueueStats::default();
        for job in jobs.values() {
            *stats
                .by_state
                .entry(job.state.as_str().to_string())
                .or_insert(0) += 1;
        }
        for (queue, items) in self.queues.read().await.iter() {
            stats.queued_by_queue.insert(queue.clone(), items.len() as u64);
        }
        for (queue, items) in self.delayed.read().await.iter() {
            stats.delayed_by_queue.insert(queue.clone(), items.len() as u64);
        }
        Ok(stats)
    }

    async fn queue_stats(&self, queue_name: &str) -> Result<SingleQueueStats, StoreError> {
        let queues = self.queues.read().await;
        let ids = queues.get(queue_name).cloned().unwrap_or_default();
        drop(queues);

        let jobs = self.jobs.read().await;
        let oldest_job_created_at = ids.first().and_then(|id| jobs.get(id)).map(|j| j.created_at);

        Ok(SingleQueueStats {
            queue_name: queue_name.to_string(),
            size: ids.len() as u64,
            oldest_job_created_at,
        })
    }

    async fn cleanup_terminal(&self, retention: chrono::Duration) -> Result<u64, StoreError> {
        let cutoff = Utc::now() - retention;
        let mut jobs = self.jobs.write().await;
        let to_remove: Vec<String> = jobs
            .values()
            .filter(|j| j.state.is_terminal())
            .filter(|j| j.completed_at.map(|t| t < cutoff).unwrap_or(false))
            .map(|j| j.id.clone())
            .collect();
        for id in &to_remove {
            jobs.remove(id);
        }
        Ok(to_remove.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobType;
    use serde_json::Map;

    fn make_job(id: &str, user: &str) -> Job {
        Job::new(
            id.to_string(),
            user.to_string(),
            JobType::TextToSoap,
            Map::new(),
            None,
            None,
            None,
        )
    }

    #[tokio::test]
    async fn put_new_and_pop_next_round_trip() {
        let store = InMemoryJobStore::new();
        store.put_new(make_job("j1", "u1")).await.unwrap();

        let popped = store.pop_next("text_processing").await.unwrap().unwrap();
        assert_eq!(popped.id, "j1");
        assert_eq!(popped.state, JobState::Processing);
    }

    #[tokio::test]
    async fn pop_next_on_empty_queue_returns_none() {
        let store = InMemoryJobStore::new();
        assert!(store.pop_next("text_processing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn cas_update_rejects_stale_expected_state() {
        let store = InMemoryJobStore::new();
        store.put_new(make_job("j1", "u1")).await.unwrap();
        store.pop_next("text_processing").await.unwrap();

        let result = store
            .cas_update(
                "j1",
                JobState::Queued,
                Box::new(|job| job.mark_completed(Map::new())),
            )
            .await;
        assert!(matches!(result, Err(StoreError::CasMismatch(_))));
    }

    #[tokio::test]
    async fn list_by_user_and_by_state() {
        let store = InMemoryJobStore::new();
        store.put_new(make_job("j1", "u1")).await.unwrap();
        store.put_new(make_job("j2", "u1")).await.unwrap();
        store.put_new(make_job("j3", "u2")).await.unwrap();

        assert_eq!(store.list_by_user("u1").await.unwrap().len(), 2);
        assert_eq!(store.list_by_state(JobState::Queued).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn promote_due_moves_only_elapsed_jobs() {
        let store = InMemoryJobStore::new();
        let mut future_job = make_job("future", "u1");
        future_job.next_eligible_at = Utc::now() + chrono::Duration::hours(1);
        store.enqueue_delayed(future_job).await.unwrap();

        let mut due_job = make_job("due", "u1");
        due_job.next_eligible_at = Utc::now() - chrono::Duration::seconds(1);
        store.enqueue_delayed(due_job).await.unwrap();

        let promoted = store.promote_due("text_processing").await.unwrap();
        assert_eq!(promoted, 1);

        let popped = store.pop_next("text_processing").await.unwrap().unwrap();
        assert_eq!(popped.id, "due");
    }

    #[tokio::test]
    async fn cleanup_terminal_removes_old_completed_jobs() {
        let store = InMemoryJobStore::new();
        let mut job = make_job("old", "u1");
        job.mark_processing();
        job.mark_completed(Map::new());
        job.completed_at = Some(Utc::now() - chrono::Duration::days(30));
        store.jobs.write().await.insert("old".to_string(), job);

        let removed = store.cleanup_terminal(chrono::Duration::days(7)).await.unwrap();
        assert_eq!(removed, 1);
        assert!(store.get("old").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn queue_stats_reports_size_and_oldest_job() {
        let store = InMemoryJobStore::new();
        assert_eq!(store.queue_stats("text_processing").await.unwrap().size, 0);

        store.put_new(make_job("j1", "u1")).await.unwrap();
        store.put_new(make_job("j2", "u1")).await.unwrap();

        let stats = store.queue_stats("text_processing").await.unwrap();
        assert_eq!(stats.size, 2);
        assert_eq!(stats.oldest_job_created_at.unwrap(), store.get("j1").await.unwrap().unwrap().created_at);
    }
}
