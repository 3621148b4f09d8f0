pub mod admin_intent;
pub mod intent_journal;
pub mod merge_rename_orchestrator;
