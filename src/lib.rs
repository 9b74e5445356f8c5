//! # Codebase Tutor
//!
//! Turns a source repository into a chaptered Markdown tutorial and serves
//! it back over HTTP.
//!
//! ## Architecture
//!
//! ```text
//!  POST /start-job ──▶ ┌─────────┐ ──▶ ┌────────────┐ ──▶ ┌──────────────┐
//!                      │  Queue  │     │   Worker   │     │ Flow engine  │
//!                      │ (SQLite)│     │            │     │ (subprocess) │
//!                      └─────────┘     └─────┬──────┘     └──────┬───────┘
//!                                            │ failures          │ Markdown
//!                                            ▼                   ▼
//!                                      ┌──────────┐      ┌──────────────┐
//!                                      │  errors  │      │  tutorials   │
//!                                      └──────────┘      └──────┬───────┘
//!                                         object store          │
//!  GET /output-structure, /output-content ◀─────────────────────┘
//!  POST /fetch-patterns ──▶ GitHub tree API ──▶ pattern analyzer
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! tutor init                                  # create queue database
//! tutor run                                   # HTTP server + worker
//! tutor patterns https://github.com/acme/widget
//! tutor structure widget
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`error`] | Service error taxonomy |
//! | [`repo_id`] | Repository identifier derivation |
//! | [`patterns`] | Include/exclude pattern suggestions |
//! | [`github`] | GitHub tree listing |
//! | [`jobs`] | Job payload validation |
//! | [`queue`] | Durable job queue |
//! | [`worker`] | Queue consumer driving the flow engine |
//! | [`engine`] | Tutorial flow engine boundary |
//! | [`artifacts`] | Tutorial structure and content |
//! | [`error_sink`] | Failure log |
//! | [`store`] | Object-store backends |
//! | [`server`] | HTTP API |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod artifacts;
pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod error_sink;
pub mod github;
pub mod jobs;
pub mod migrate;
pub mod models;
pub mod patterns;
pub mod queue;
pub mod repo_id;
pub mod server;
pub mod store;
pub mod worker;
