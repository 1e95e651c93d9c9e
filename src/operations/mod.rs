// Operations module
// Business logic for manifests, diffs, sync planning and execution

pub mod diff;
pub mod manifest;
pub mod plan;
pub mod sync;

pub use diff::{CompareMode, DiffEngine, DiffResult};
pub use manifest::{FileStat, Manifest, ManifestDelta};
pub use plan::{
    plan_baseline_pull, plan_baseline_push, plan_delete, plan_mkdir, plan_pull, plan_push, plan_wipe,
    SyncOperation, SyncPlan,
};
pub use sync::{OperationFailure, SyncExecutor, SyncOptions, SyncReport};
