pub mod chunker;
pub mod error;
pub mod scheduler;
pub mod task;
