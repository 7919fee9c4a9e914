//! Job Worker Service - Entry Point
//!
//! Background worker that drains the job-processing subsystem's queues.

#[tokio::main]
async fn main() -> eyre::Result<()> {
    zerg_job_worker::run().await
}
