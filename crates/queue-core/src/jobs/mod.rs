pub mod admin;
pub mod error_codes;
pub mod lifecycle;
pub mod model;
pub mod recovery;
pub mod repo;
pub mod retry;
pub mod settings;

pub use admin::AdminApi;
pub use error_codes::{HandlerOutcome, JobError};
pub use lifecycle::JobLifecycle;
pub use model::{validate_payload, Job, JobState, JobType, NewJob};
pub use recovery::spawn_recovery_loop;
pub use repo::{EnqueueOutcome, JobFilters, JobsRepo};
pub use settings::{QueueSettings, SettingsRepo};
