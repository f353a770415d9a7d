pub mod cache;
pub mod error;
pub mod hooks;
pub mod lockfile;
pub mod observability;
pub mod perf;
pub mod pipeline;
pub mod presets;
pub mod recipe;
pub mod reference;
pub mod results;
pub mod sanity;
pub mod settings;
pub mod stages;
pub mod validation;

pub use error::{PipelineError, StageResult};
pub use pipeline::{Artifact, PipelineExecutor, PipelineReport, PipelineState, StageRegistry};
pub use recipe::Recipe;
