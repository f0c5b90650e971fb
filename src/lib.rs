pub mod augment;
pub mod config;
pub mod dispatch;
pub mod fetcher;
pub mod mute;
pub mod orchestrator;
pub mod parser;
pub mod payload;
pub mod platforms;
pub mod scheduler;
pub mod store;
pub mod types;

pub use config::Settings;
pub use dispatch::{DispatchEngine, DispatchSummary, DispatchTarget};
pub use fetcher::{FeedCacheHeaders, FeedSource, FetchConfig, FetchOutcome, Fetcher};
pub use mute::{MuteEvaluator, MutePolicy, MuteWindow};
pub use orchestrator::{build_bindings, CycleReport, FeedBinding, Orchestrator};
pub use parser::FeedParser;
pub use scheduler::CronSchedule;
pub use store::{DedupStore, FinalizeOutcome};
pub use types::*;
