pub mod catalog;
pub mod change_tracker;
pub mod classifier;
pub mod job_runner;
pub mod queue;
pub mod state_store;
pub mod sync_handler;
