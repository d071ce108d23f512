//! # Figure Harness
//!
//! A resumable pipeline that pulls figures out of PDFs, asks a vision model
//! to describe each one as structured JSON, and indexes the descriptions for
//! free-text retrieval.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌───────────┐   ┌───────────┐   ┌──────────┐
//! │   PDFs   │──▶│  Extract  │──▶│  Analyze  │──▶│  Index   │
//! │ input_dir│   │ text+imgs │   │ vision API│   │  store   │
//! └──────────┘   └─────┬─────┘   └─────┬─────┘   └────┬─────┘
//!                      │               │              │
//!                      ▼               ▼              ▼
//!                ┌─────────────────────────────────────────┐
//!                │        SQLite ledger (one writer)       │
//!                └─────────────────────────────────────────┘
//! ```
//!
//! Every stage asks the ledger what is left to do, so any command can be
//! interrupted and re-run.
//!
//! ## Quick Start
//!
//! ```bash
//! fig init                    # create the ledger
//! fig extract                 # PDFs -> text + images
//! fig analyze                 # images -> JSON descriptions
//! fig retry --status 429      # re-run rate-limited analyses
//! fig index                   # JSON -> vector store
//! fig query "rainfall by month"
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`db`] | SQLite connection pool |
//! | [`migrate`] | Ledger and store schema |
//! | [`models`] | Ledger record types |
//! | [`error`] | Error taxonomy |
//! | [`hasher`] | Content fingerprints |
//! | [`ledger`] | Durable per-item state |
//! | [`layout`] | Output paths |
//! | [`extract`] | PDF text and image extraction |
//! | [`http`] | Shared backoff loop for remote calls |
//! | [`vision`] | Vision model providers |
//! | [`prompts`] | The analysis prompt |
//! | [`processor`] | Cached per-image analysis |
//! | [`image_embed`] | Optional image embeddings |
//! | [`retry`] | Retry sweeps |
//! | [`validate`] | Response JSON validation |
//! | [`indexer`] | Vector store indexing |
//! | [`store`] | Vector store backends |
//! | [`embedding`] | Text embedding providers |
//! | [`search`] | `fig query` |
//! | [`get`] | `fig get` |
//! | [`stats`] | `fig stats` |
//! | [`pipeline`] | Stage commands |

pub mod config;
pub mod db;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod get;
pub mod hasher;
pub mod http;
pub mod image_embed;
pub mod indexer;
pub mod layout;
pub mod ledger;
pub mod migrate;
pub mod models;
pub mod pipeline;
pub mod processor;
pub mod prompts;
pub mod retry;
pub mod search;
pub mod stats;
pub mod store;
pub mod validate;
pub mod vision;
