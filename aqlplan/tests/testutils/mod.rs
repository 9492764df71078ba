//! Test utilities for aqlplan integration tests
//!
//! Fixtures build in-memory catalogs and drive ONLY the public
//! `QueryCoordinator` API.

pub mod test_fixture;
