//! Scenario matrix as a libtest suite.
//!
//! Everything lives in `tests/matrix.rs`; point `INTERPOSE_SUBJECT` at a
//! subject binary and run `cargo test -p interpose-matrix-tests`.
