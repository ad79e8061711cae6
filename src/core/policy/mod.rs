// Core policy module - typed per-chat policies and their hot-reloading source.
// Following the same pattern as the moderation module.

pub mod policy_models;
pub mod policy_resolver;

pub use policy_models::*;
pub use policy_resolver::*;
