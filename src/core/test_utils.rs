//! Test utilities for arena-based testing.
//!
//! Every compilation borrows its names from a session arena; these helpers own
//! the arena for the duration of a test so IR can be built and inspected
//! without threading lifetimes through each test body.
