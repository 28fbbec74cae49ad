pub mod config_loader;
pub mod control;
pub mod deploy;
pub mod git;
pub mod instance;
pub mod ports;
pub mod registry;
pub mod shutdown;
