//! Run logging: JSONL event log with graceful degradation and an optional console echo.

pub mod events;
pub mod jsonl;
