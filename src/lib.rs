pub mod admin;
pub mod broker;
pub mod config;
pub mod coordinator;
pub mod metrics;
pub mod output;
pub mod payload;
pub mod peer;
pub mod protocol;
pub mod results;
pub mod worker;

pub use admin::{AdminHandle, AdminServer};
pub use broker::{BrokerController, CommandRunner, ShellRunner, controller_for};
pub use config::{BrokerKind, Config, TestMode};
pub use coordinator::RunError;
pub use output::{ColorMode, OutputFormat, OutputFormatter, create_formatter};
pub use peer::{Backend, MockBroker, Peer, PeerError};
pub use results::{LatencySummary, Report, WorkerResult};
pub use worker::{Phase, SharedState};
