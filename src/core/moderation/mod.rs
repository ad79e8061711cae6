// Core moderation module - decision engine, verdict models and notice texts.
// Following the same pattern as the classifier module.

pub mod moderation_engine;
pub mod moderation_models;
pub mod templates;

pub use moderation_engine::*;
pub use moderation_models::*;
