// Ledger infra layer.
// - `in_memory.rs` keeps escalation state in process memory.
// - `sqlite_ledger.rs` persists it to SQLite.

#[path = "in_memory.rs"]
pub mod in_memory;

#[path = "sqlite_ledger.rs"]
pub mod sqlite_ledger;

pub use in_memory::InMemoryLedger;
pub use sqlite_ledger::SqliteLedger;
