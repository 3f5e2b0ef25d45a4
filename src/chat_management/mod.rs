pub mod message_classifier;

pub use message_classifier::*;
