//! Test helper modules for djq-player integration tests
//!
//! Provides reusable test infrastructure components:
//! - Mock collaborators: sink, fetcher, resolver and recommender
//! - TestSession: one engine wired to mocks over a temporary cache directory
//! - Event waiting helpers

#![allow(dead_code)]

pub mod mocks;
pub mod test_session;

pub use mocks::{MockFetcher, MockRecommender, MockResolver, MockSink};
pub use test_session::{create_test_track, next_event, no_event_within, test_config, wait_started, TestSession};
