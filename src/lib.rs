pub mod core;
pub mod features;
pub mod scraping;

// --- Primary core exports ---
pub use core::types::*;
pub use core::AppState;
pub use core::{config, errors, types};

// --- Short module paths ---
pub use features::{conversation, delivery, inbound, job_coordinator, normalizer, session_store};
pub use scraping::{driver, resolver, selectors};
