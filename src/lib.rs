pub mod config;
pub mod element_finder;
pub mod models;
pub mod notification;
pub mod plugins;
pub mod product_manager;
pub mod renderer;
pub mod scheduler;
pub mod source_tracker;
pub mod store;
pub mod throttle;
pub mod utils;

// Re-export commonly used types
pub use config::AppConfig;
pub use element_finder::ElementFinder;
pub use plugins::PluginManager;
pub use product_manager::{ProductCheckResult, ProductManager, ProductRequest, SourceRequest};
pub use renderer::{HttpRenderer, Renderer};
pub use scheduler::{CycleHandle, CycleRunner, CycleScheduler, CycleSummary};
pub use source_tracker::SourceTracker;
pub use store::{MemoryStore, Store};
pub use utils::error::AppError;

pub type Result<T> = std::result::Result<T, AppError>;
