//! CLI and self-test tooling for the yblob PIV blob store.
//!
//! This crate provides:
//! - The `yblob` command-line tool: format/store/fetch/remove/list/fsck,
//!   driven against an in-memory emulated token whose object table round
//!   trips through a `--state` JSON file across invocations.
//! - [`self_test`]: a randomized operation generator checked against a
//!   shadow model, standing in for what the original tool's
//!   `self_test.py` ran against real hardware before every release.

#![forbid(unsafe_code)]


pub use self_test::{SelfTestError, SelfTestReport};
