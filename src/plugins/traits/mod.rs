pub mod tracker;
pub mod notifier;

pub use tracker::{
    TrackerPlugin, ParseResult, ParseContext, ComparisonResult, ChangeType, BestDirection,
    ElementMatch, ConfigSchema,
};
pub use notifier::{NotifierPlugin, NotificationEvent, NotificationResult};
