//! Test utilities for runtime testing.
//!
//! Provides a fluent builder any runtime test can use without circular
//! dependencies: the body under test is written as WAT, parsed, and run
//! in a frame wired to a one-page memory and any declared locals/globals.
