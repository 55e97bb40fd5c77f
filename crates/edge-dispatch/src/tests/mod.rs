//! Pipeline scenario tests.
//!
//! - `harness.rs`   - scripted mock network and a fully wired pipeline
//! - `ordering.rs`  - FIFO delivery, correlation, readiness and request shaping
//! - `consent.rs`   - consent gating of the hit queue
//! - `retry.rs`     - recoverable and terminal failures
//! - `streaming.rs` - streamed responses, store payloads and location hints
//! - `reset.rs`     - identity reset and persistence across restarts

mod ordering;
mod reset;
