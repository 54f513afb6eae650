//! Testing utilities shared by the in-crate unit tests.

pub mod fixtures;
pub mod mocks;
