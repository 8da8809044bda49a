pub mod config;
pub mod deduplication;
pub mod instruments;
pub mod market;
pub mod notifier;
pub mod scanner;
pub mod signal;
pub mod supervisor;
pub mod telegram;
pub mod types;

// Re-export for tests
pub use scanner::ScanLoop;
pub use supervisor::SessionSupervisor;
