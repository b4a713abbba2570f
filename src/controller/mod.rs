pub mod annotations;
pub mod async_step;
pub mod client;
pub mod context;
pub mod custom_resources;
pub mod delete;
pub mod dependency;
pub mod error;
pub mod events;
pub mod export_mode;
pub mod health_status;
pub mod infra;
pub mod install;
pub mod manager;
pub mod operations;
pub mod predicates;
pub mod reconciler;
pub mod requeue;
pub mod restart;
pub mod retry;
pub mod service_account;
pub mod start_stop;
pub mod status;
pub mod support_mode;
pub mod upgrade;
pub mod validation;
pub mod volume;
pub mod workflow;

pub use context::{CONTROLLER_NAME, Context};
pub use error::{BackoffConfig, Error, Result, ResultExt};
pub use manager::DoguManager;
pub use operations::{ObservedState, Operation, required_operations};
pub use reconciler::{FINALIZER, error_policy, reconcile};
pub use requeue::{ERROR_REQUEUE_INTERVAL, RequeueDecision, RequeueHandler};
pub use restart::{reconcile_restart, restart_error_policy};
pub use status::{ConditionBuilder, StatusManager};
pub use validation::{validate_spec, validate_upgradeability};
