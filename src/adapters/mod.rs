//! Adapter contract, SDK helpers, and the adapter registry (§4.1).
//!
//! This module may import `domain` and `git` but never `cli`.

pub mod aider;
pub mod claude_code;
pub mod codex_cli;
pub mod gemini_cli;
pub mod registry;
pub mod sdk;

use std::path::PathBuf;

use anyhow::Result;

use crate::domain::{DedupStrategy, ParsedConversation, Source};

pub const ADAPTER_INTERFACE_VERSION: u32 = 1;

/// An adapter turns one harness's on-disk log format into `ParsedConversation`s.
///
/// Built-in adapters implement this trait directly. Drop-in adapters are
/// wrapped by `registry::SubprocessAdapter`, which speaks the same contract
/// over a JSON-RPC subprocess.
pub trait Adapter: Send + Sync {
    fn name(&self) -> &'static str;
    fn interface_version(&self) -> u32 {
        ADAPTER_INTERFACE_VERSION
    }
    fn default_locations(&self) -> Vec<PathBuf>;
    fn dedup_strategy(&self) -> DedupStrategy;
    fn harness_source(&self) -> &'static str;
    fn harness_log_format(&self) -> &'static str;
    fn supports_live_registration(&self) -> bool {
        false
    }
    fn discover(&self, locations: Option<&[PathBuf]>) -> Result<Vec<Source>>;
    fn can_handle(&self, source: &Source) -> bool;
    fn parse(&self, source: &Source) -> Result<Vec<ParsedConversation>>;
}
