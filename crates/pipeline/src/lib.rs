pub mod engine;
pub mod error;
pub mod exec;
pub mod loader;
pub mod meta;

pub use engine::Pipeline;
pub use error::{ExecError, PipelineError};
pub use exec::{CommandRunner, ShellRunner, StderrPolicy};
pub use loader::{discover, load, load_all, LoadedPipeline, Placeholders, PIPELINE_FILE};
pub use meta::{PipeMode, PipelineMeta, Stage};
