//! Dataset configuration and workflow orchestration.
//!
//! # Configuration
//!
//! Every command takes the dataset's global config:
//!
//! ```rust,ignore
//! use nipoppy::pipeline::GlobalConfig;
//!
//! let config = GlobalConfig::load(Path::new("global_config.json"))?;
//! let layout = config.layout();
//! println!("status file: {}", layout.status_file.display());
//! ```
//!
//! `NIPOPPY_DATASET_ROOT` overrides `DATASET_ROOT` from the file.
//!
//! # Workflows
//!
//! `WORKFLOWS` lists workflow names run in order by [`WorkflowRunner`]:
//!
//! ```rust,ignore
//! let executions = WorkflowRunner::new(config).run_all()?;
//! for execution in executions {
//!     println!("{}: {}", execution.workflow, execution.status);
//! }
//! ```

pub mod config;
pub mod workflow;

pub use config::{ConfigError, DatasetLayout, GlobalConfig};
pub use workflow::{Workflow, WorkflowExecution, WorkflowRunner, WorkflowStatus};
