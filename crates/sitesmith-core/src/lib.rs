pub mod billing;
pub mod config;
pub mod error;
pub mod ledger;
pub mod llm;
pub mod model;
pub mod pipeline;
pub mod preview;
pub mod projects;
pub mod prompts;
pub mod publish;
pub mod retry;
pub mod sanitize;
pub mod storage;
pub mod stripe;
pub mod versions;
