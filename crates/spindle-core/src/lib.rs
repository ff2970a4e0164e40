pub mod config;
pub mod errors;
pub mod mover;
pub mod plan;
pub mod verifier;
pub mod volume;
pub mod work;
pub mod worker;

pub use config::BalancerConfig;
pub use errors::{BalancerError, Result};
pub use plan::{plan_id_of, BalancePlan, MoveStep};
pub use work::{PlanState, WorkStatus};
pub use worker::DiskBalancer;
