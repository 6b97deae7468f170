pub mod error;
pub mod pipeline;
pub mod queue;
