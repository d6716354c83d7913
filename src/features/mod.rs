pub mod conversation;
pub mod delivery;
pub mod inbound;
pub mod job_coordinator;
pub mod normalizer;
pub mod session_store;
