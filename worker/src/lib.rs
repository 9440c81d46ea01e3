pub mod config_cache;
pub mod match_engine;
pub mod poller;
pub mod retention;
pub mod scheduler;

pub use config_cache::ConfigCache;
pub use match_engine::MatchEngine;
pub use poller::{PollSummary, Poller};
pub use retention::cleanup_old_data;
pub use scheduler::{now, CycleSummary, Scheduler, SchedulerConfig};
