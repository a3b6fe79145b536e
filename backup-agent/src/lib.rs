//! Backup execution agent library.
//!
//! Everything an execution agent needs regardless of where it runs: the
//! task wire types exchanged with the coordinator, the sync-tool
//! invocation and output parser, the single-task executor, and the
//! status-reporter seam. The coordinator links this library for its
//! in-process worker; the `backup-agent` binary wraps it as a
//! standalone remote agent.

pub mod api;
pub mod config;
pub mod daemon;
pub mod enroll;
pub mod executor;
pub mod report;
pub mod sync;
pub mod task;
pub mod utils;

pub use config::Config;
pub use utils::errors::AgentError;
pub type Result<T> = std::result::Result<T, AgentError>;
