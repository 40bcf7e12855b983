pub mod agent;
pub mod bus;
pub mod commands;
pub mod config;
pub mod pid;
pub mod scheduler;
pub mod watchdog;
pub mod worker;

pub use bus::BroadcastBus;
pub use commands::{drain_input, DrainedInput};
pub use config::{parse_kv, DaemonConfig, DEFAULT_CONFIG_PATH};
pub use scheduler::{recover, Scheduler};
pub use watchdog::Watchdog;
pub use worker::{ProjectWorker, RuntimeHandles};
