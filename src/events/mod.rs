//! Live update channel: status changes and log lines pushed per entity topic.

pub mod publisher;

pub use publisher::{EventPublisher, PublishedEvent};
