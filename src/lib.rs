//! # siftd
//!
//! **Aggregates AI coding-assistant conversation logs into a single
//! queryable, searchable corpus.**
//!
//! siftd ingests session logs from multiple coding harnesses (Claude Code,
//! Codex CLI, Aider, Gemini CLI, and drop-in adapters), normalizes them into
//! a shared conversation model, and exposes hybrid search (full-text +
//! semantic) plus tagging, live-session tracking, and maintenance tooling
//! over a single SQLite store.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────┐   ┌──────────┐   ┌───────────┐
//! │ Adapters  │──▶│  Ingest  │──▶│  SQLite   │
//! │ per-harness│   │ dedup   │   │ FTS5+blob │
//! └───────────┘   └──────────┘   └─────┬─────┘
//!                                        │
//!                      ┌─────────────────┤
//!                      ▼                 ▼
//!                ┌──────────┐      ┌───────────┐
//!                │ Retrieval│      │ Embeddings │
//!                │  engine  │      │  (derived) │
//!                └──────────┘      └───────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`domain`] | Core data types: harnesses, conversations, prompts, responses |
//! | [`paths`] | XDG base directory resolution |
//! | [`git`] | Workspace identity: worktree resolution, remote URL normalization |
//! | [`adapters`] | Adapter contract, built-in adapters, drop-in subprocess loader |
//! | [`ingest`] | Ingestion orchestration: discover → parse → dedup → store |
//! | [`progress`] | Ingest progress reporting contract |
//! | [`storage`] | Main relational store: identity, event, content, join tables |
//! | [`content_filters`] | Binary/large-base64 tool-result filtering |
//! | [`model_names`] | Raw model name parsing into creator/family/version |
//! | [`shell_categories`] | Shell command categorization for `shell:*` tags |
//! | [`sessions`] | Live session tracking and pending-tag reconciliation |
//! | [`embeddings`] | Chunking, embedding backends, and the derived vector index |
//! | [`retrieval`] | Hybrid search: candidate filtering, FTS recall, vector rerank |
//! | [`backfill`] | Idempotent maintenance operations over already-ingested data |
//! | [`doctor`] | Uniform check system for corpus health |
//! | [`formatters`] | Output formatter contract: built-ins plus drop-in subprocess formatters |
//! | [`db`] | SQLite connection pooling (WAL, foreign keys) for both databases |
//! | [`error`] | Typed errors at the library boundary |
//!
//! ## Configuration
//!
//! siftd is configured via a TOML file (default:
//! `$XDG_CONFIG_HOME/siftd/config.toml`). See [`config`] for the full key
//! set and defaults.

pub mod adapters;
pub mod backfill;
pub mod config;
pub mod content_filters;
pub mod db;
pub mod doctor;
pub mod domain;
pub mod embeddings;
pub mod error;
pub mod formatters;
pub mod git;
pub mod ingest;
pub mod model_names;
pub mod paths;
pub mod progress;
pub mod retrieval;
pub mod sessions;
pub mod shell_categories;
pub mod storage;
