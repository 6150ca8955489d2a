pub mod batch;
pub mod cover;
pub mod orchestrator;
pub mod poller;
pub mod prompt;
pub mod provider;
pub mod variety;
pub mod workflow;
