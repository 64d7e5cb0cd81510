// Background settlement engine: confirmation reconciliation and vendor payouts
pub mod batcher;
pub mod payout;
pub mod reconciler;
pub mod scheduler;
pub mod status;

pub use batcher::{SettlementBatcher, SettlementOutcome};
pub use payout::PayoutExecutor;
pub use reconciler::{ConfirmationReconciler, MergeOutcome, SweepSummary};
pub use scheduler::{spawn_periodic, Sweep, SweepContext, SweepSchedule};
