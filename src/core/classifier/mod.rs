// Core classifier module - trains and scores per-chat text models.
// Following the same pattern as the moderation module.

pub mod bayes;
pub mod classifier_service;
pub mod tokenizer;

pub use bayes::*;
pub use classifier_service::*;
