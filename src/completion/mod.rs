// SPDX-License-Identifier: MIT
//! Inline completion pipeline: request coordination, suggestion caching,
//! cancellation supersession, and acceptance tracking.

pub mod acceptance;
pub mod cache;
pub mod coordinator;
pub mod model;
pub mod provider;

pub use coordinator::CompletionRequestCoordinator;
pub use model::{CompletionOutcome, CompletionRequest};
