//! # Incident Harness
//!
//! Incident retrieval and confidence routing. An incoming incident (free text
//! or an uploaded screenshot) is matched against a runbook corpus with hybrid
//! search, a planner turns the best matches into remediation steps with a
//! confidence score, and the action router decides whether to notify, open a
//! ticket, or hand off for human review. Every decision is recorded as a run
//! that can be listed, inspected, and replayed.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────┐   ┌──────────────┐   ┌──────────┐   ┌───────────┐
//! │ text/OCR  │──▶│ Hybrid Search│──▶│ Planner  │──▶│  Router   │
//! └───────────┘   └──────┬───────┘   └──────────┘   └─────┬─────┘
//!                        │                                 │
//!                        ▼                                 ▼
//!                   ┌──────────┐                   ┌──────────────┐
//!                   │  SQLite  │◀──── runs ────────│ Slack / Jira │
//!                   └──────────┘                   └──────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! ihx init
//! ihx search "401 on login" --service auth
//! ihx run "auth-service returns 401 after deploy" --create-ticket
//! ihx runs list --limit 10
//! ihx serve
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`sqlite_store`] | SQLite implementation of the core `Store` |
//! | [`embedding`] | OpenAI-compatible embedding provider |
//! | [`planner`] | OpenAI-compatible chat completion planner |
//! | [`notify`] | Slack notifier |
//! | [`tracker`] | Jira ticket tracker |
//! | [`enrich`] | Status endpoint enrichment |
//! | [`ocr`] | Tesseract text extraction |
//! | [`pipeline`] | Request-scoped search, plan, route, record |
//! | [`server`] | HTTP API |
//! | [`search`], [`runs`] | CLI commands |
//! | [`logging`] | tracing subscriber setup |

pub mod config;
pub mod db;
pub mod embedding;
pub mod enrich;
pub mod logging;
pub mod migrate;
pub mod notify;
pub mod ocr;
pub mod pipeline;
pub mod planner;
pub mod runs;
pub mod search;
pub mod server;
pub mod sqlite_store;
pub mod tracker;
