//! Sales Agent: automated email sales replies with follow-up scheduling.

pub mod config;
pub mod error;
pub mod format;
pub mod leads;
pub mod ledger;
pub mod llm;
pub mod mailbox;
pub mod pipeline;
pub mod prompts;
pub mod store;
