//! Command implementations behind the `doctax` binary.
pub mod classify;
pub mod review;
pub mod taxonomy;
