pub mod config;
pub mod instance;

pub use config::{DaemonConfig, FileConfig};
pub use instance::{InstanceInfo, InstanceStatus};
