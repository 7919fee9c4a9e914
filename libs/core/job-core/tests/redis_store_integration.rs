//! Integration tests for `RedisJobStore` against a real Redis instance.
//!
//! These complement the in-memory store's unit tests by exercising the
//! actual Lua scripts (`cas_update`, `pop_next`) and sorted-set-backed
//! delayed index against a real server via testcontainers, per §4.A's
//! linearizability and no-dual-dequeue guarantees (P3).

use std::sync::Arc;

use chrono::Utc;
use job_core::{Job, JobState, JobStore, JobType, RedisJobStore};
use redis::aio::ConnectionManager;
use serde_json::Map;
use test_utils::TestRedis;

async fn redis_store() -> (TestRedis, RedisJobStore) {
    let redis = TestRedis::new().await;
    let client = redis::Client::open(redis.connection_string()).expect("valid redis uri");
    let conn = ConnectionManager::new(client)
        .await
        .expect("connect to test redis");
    let store = RedisJobStore::new(conn, "jobcore-test:");
    (redis, store)
}

fn make_job(id: &str, user: &str, job_type: JobType) -> Job {
    Job::new(id.to_string(), user.to_string(), job_type, Map::new(), None, None, None)
}

#[tokio::test]
async fn put_new_and_pop_next_round_trip_through_redis() {
    let (_redis, store) = redis_store().await;
    store.put_new(make_job("j1", "u1", JobType::TextToSoap)).await.unwrap();

    let popped = store.pop_next("text_processing").await.unwrap().unwrap();
    assert_eq!(popped.id, "j1");
    assert_eq!(popped.state, JobState::Processing);
    assert!(popped.started_at.is_some());
}

#[tokio::test]
async fn pop_next_never_returns_the_same_job_twice_under_concurrent_pops() {
    let (_redis, store) = redis_store().await;
    for i in 0..20 {
        store
            .put_new(make_job(&format!("j{i}"), "u1", JobType::TextToSoap))
            .await
            .unwrap();
    }

    let store = Arc::new(store);
    let mut handles = Vec::new();
    for _ in 0..4 {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            let mut popped = Vec::new();
            while let Some(job) = store.pop_next("text_processing").await.unwrap() {
                popped.push(job.id);
            }
            popped
        }));
    }

    let mut all_ids = Vec::new();
    for h in handles {
        all_ids.extend(h.await.unwrap());
    }

    all_ids.sort();
    let mut deduped = all_ids.clone();
    deduped.dedup();
    assert_eq!(all_ids.len(), 20, "every job should be popped exactly once");
    assert_eq!(all_ids, deduped, "no job should be popped twice (P3)");
}

#[tokio::test]
async fn cas_update_rejects_a_stale_expected_state() {
    let (_redis, store) = redis_store().await;
    store.put_new(make_job("j1", "u1", JobType::TextToSoap)).await.unwrap();
    store.pop_next("text_processing").await.unwrap();

    let result = store
        .cas_update("j1", JobState::Queued, Box::new(|j| j.mark_completed(Map::new())))
        .await;
    assert!(result.is_err());
}

#[tokio::test]
async fn promote_due_moves_only_elapsed_jobs_in_redis() {
    let (_redis, store) = redis_store().await;

    let mut future_job = make_job("future", "u1", JobType::AudioToSoap);
    future_job.next_eligible_at = Utc::now() + chrono::Duration::hours(1);
    store.enqueue_delayed(future_job).await.unwrap();

    let mut due_job = make_job("due", "u1", JobType::AudioToSoap);
    due_job.next_eligible_at = Utc::now() - chrono::Duration::seconds(1);
    store.enqueue_delayed(due_job).await.unwrap();

    let promoted = store.promote_due("audio_processing").await.unwrap();
    assert_eq!(promoted, 1);

    let popped = store.pop_next("audio_processing").await.unwrap().unwrap();
    assert_eq!(popped.id, "due");
    assert!(store.pop_next("audio_processing").await.unwrap().is_none());
}

#[tokio::test]
async fn list_by_user_and_by_state_use_the_redis_indexes() {
    let (_redis, store) = redis_store().await;
    store.put_new(make_job("j1", "u1", JobType::TextToSoap)).await.unwrap();
    store.put_new(make_job("j2", "u1", JobType::TextToSoap)).await.unwrap();
    store.put_new(make_job("j3", "u2", JobType::TextToSoap)).await.unwrap();

    assert_eq!(store.list_by_user("u1").await.unwrap().len(), 2);
    assert_eq!(store.list_by_state(JobState::Queued).await.unwrap().len(), 3);

    store.pop_next("text_processing").await.unwrap();
    assert_eq!(store.list_by_state(JobState::Queued).await.unwrap().len(), 2);
    assert_eq!(store.list_by_state(JobState::Processing).await.unwrap().len(), 1);
}
