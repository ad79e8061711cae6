// The core module contains all business logic.
// Each feature gets its own submodule.

#[path = "classifier/mod.rs"]
pub mod classifier;

#[path = "ledger/violation_ledger.rs"]
pub mod ledger;

#[path = "moderation/mod.rs"]
pub mod moderation;

#[path = "policy/mod.rs"]
pub mod policy;
