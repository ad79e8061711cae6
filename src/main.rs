// This is the entry point of the moderation demo driver.
//
// **Architecture Overview:**
// - `core/` = Business logic (platform-agnostic)
// - `infra/` = Implementations of core traits (storage backends)
//
// This file's job is to:
// 1. Load configuration from the environment
// 2. Initialize services (dependency injection)
// 3. Pump chat messages from stdin through the engine and print verdicts
//
// Each input line is `<chat_id> <user_id> <message text...>`; the verdict
// for it is printed as one JSON line, the same shape connectors consume.

use chat_warden::core::classifier::BayesClassifier;
use chat_warden::core::ledger::ViolationLedger;
use chat_warden::core::moderation::ModerationEngine;
use chat_warden::core::policy::PolicyResolver;
use chat_warden::infra::ledger::{InMemoryLedger, SqliteLedger};

#[tokio::main]
async fn main() {
    // Initialize logging so we can see what's happening
    tracing_subscriber::fmt::init();

    // Load environment variables from .env file (if it exists)
    dotenv::dotenv().ok();

    // Where the per-chat rules document lives; a missing file just means
    // built-in defaults for every chat.
    let rules_path =
        std::env::var("RULES_FILE").unwrap_or_else(|_| "config/rules.yaml".to_string());

    // ========================================================================
    // DEPENDENCY INJECTION
    // ========================================================================
    // Create our services with their dependencies.
    // This is the "composition root" where we wire everything together.

    use std::sync::Arc;

    // Escalation state lives in memory unless LEDGER_DB points at a SQLite file.
    let ledger: Arc<dyn ViolationLedger> = match std::env::var("LEDGER_DB") {
        Ok(db_path) => {
            let pool = sqlx::sqlite::SqlitePoolOptions::new()
                .connect(&format!("sqlite://{}?mode=rwc", db_path))
                .await
                .expect("Failed to connect to ledger DB");
            let sqlite_ledger = SqliteLedger::new(pool);
            sqlite_ledger
                .migrate()
                .await
                .expect("Failed to migrate ledger DB");
            Arc::new(sqlite_ledger)
        }
        Err(_) => Arc::new(InMemoryLedger::new()),
    };

    let resolver = PolicyResolver::new(&rules_path);
    let engine = ModerationEngine::new(ledger, BayesClassifier::new());

    tracing::info!("Using rules file {}", rules_path);
    tracing::info!("Reading `chat_id user_id message` lines from stdin");

    let mut line = String::new();
    loop {
        line.clear();
        match std::io::stdin().read_line(&mut line) {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                tracing::error!("Failed to read from stdin: {}", e);
                break;
            }
        }
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let mut parts = trimmed.splitn(3, ' ');
        let (Some(chat_id), Some(user_id), Some(message)) =
            (parts.next(), parts.next(), parts.next())
        else {
            tracing::warn!("Skipping malformed line (want `chat_id user_id message`)");
            continue;
        };

        // Connectors check the enabled flag before calling the engine, so the
        // driver does the same.
        let policy = resolver.resolve(chat_id).await;
        if !policy.enabled {
            println!("{}", serde_json::json!({ "type": "none" }));
            continue;
        }

        match engine.evaluate(message, user_id, chat_id, &policy).await {
            Ok(Some(verdict)) => {
                let payload =
                    serde_json::to_string(&verdict).expect("Failed to serialize verdict");
                println!("{}", payload);
            }
            Ok(None) => println!("{}", serde_json::json!({ "type": "none" })),
            Err(e) => tracing::error!("Moderation evaluation failed: {}", e),
        }
    }
}
