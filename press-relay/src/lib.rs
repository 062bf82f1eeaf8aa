pub mod config;
pub mod fetcher;
pub mod hub;
pub mod scheduler;
pub mod server;
pub mod sources;
pub mod store;
pub mod traits;
pub mod types;

pub use config::{Cli, Command, Settings};
pub use fetcher::Fetcher;
pub use hub::{BroadcastHub, Subscription, SubscriptionState};
pub use scheduler::Scheduler;
pub use sources::{Source, SourceSpec};
pub use store::EventStore;
pub use traits::ExtractionProvider;
pub use types::*;
