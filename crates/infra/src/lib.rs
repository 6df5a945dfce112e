//! Infrastructure layer: storage adapters and background workers for the auth core.

pub mod memory;
pub mod reaper;


pub use memory::InMemoryAuthStore;
pub use reaper::{ReaperHandle, SessionReaper};
