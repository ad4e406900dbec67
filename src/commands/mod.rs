// Operator command handlers - one file per concern
pub mod jobs;
pub mod settings;
