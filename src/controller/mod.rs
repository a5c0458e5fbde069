pub mod context;
pub mod error;
pub mod events;
pub mod reconciler;
pub mod state_machine;
pub mod status;
pub mod validation;
pub mod work_queue;

pub use context::{Context, ControllerSettings};
pub use error::{BackoffConfig, Error, Result};
pub use events::{ChangeEvent, ChangeTracker, ObjectKey, split_meta_namespace_key};
pub use reconciler::{run_worker, sync};
pub use state_machine::{JobOutcome, LotusEvent, LotusStateMachine, TransitionResult};
pub use status::{DeclaredStages, StatusManager, derive_status};
pub use validation::{validate_cleaner, validate_lotus, validate_preparer, validate_run};
pub use work_queue::WorkQueue;
