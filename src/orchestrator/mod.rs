//! Job orchestration modules.
//!
//! Covers the job lifecycle state machine, child process supervision with
//! escalating shutdown, and the liveness reporter.

pub mod heartbeat;
pub mod job_machine;
pub mod supervisor;
