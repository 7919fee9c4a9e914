//! Managed worker pools (§4.E) and the scheduler that runs them (§4.F).
//!
//! This crate owns everything downstream of the job store: pulling a job
//! off its queue, validating its input, calling the right upstream AI
//! service, and feeding the outcome back through the retry policy engine.
//! It depends on `job-core` for the store, retry policy, health registry,
//! and degradation controller, but never the other way around.

pub mod audio_store;
pub mod clients;
pub mod mime;
pub mod pool;
pub mod worker;

pub use audio_store::{AudioBlobStore, BlobNotFound, InMemoryAudioBlobStore};
pub use clients::{AgentClient, ProbeHealth, TranscriptionClient, UpstreamError};
pub use pool::{PoolHandle, WorkerPoolScheduler, WorkerPoolSchedulerConfig};
pub use worker::{AudioWorker, ManagedWorker, TextWorker};
