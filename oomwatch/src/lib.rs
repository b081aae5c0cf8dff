pub mod collector;
pub mod config;
pub mod config_manager;
pub mod core_logic;
pub mod daemon_handler;
pub mod enrich;
pub mod event_bus;
pub mod logger;
pub mod probe;
pub mod publisher;
pub mod report;
pub mod service_manager;
pub mod signal_handler;
pub mod subscriber;
pub mod table;
