// Re-export the pipeline stages from the submodules
mod task;
mod workers;

pub use task::{CollectionTask, TaskConfig};
pub use workers::WorkerPool;
