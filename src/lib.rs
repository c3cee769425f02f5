//! # ara-index
//!
//! Turns regulatory source documents (PDF, Markdown, plain text) into a flat
//! list of overlapping text chunks and persists that list as one retrieval
//! index, readable wholesale by the analysis backend.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌────────────┐   ┌───────────┐   ┌──────────────────┐
//! │ seed listing │──▶│  extract   │──▶│   chunk   │──▶│   index store    │
//! │  or uploads  │   │ pdf/md/txt │   │ 1200/150  │   │ sharded KV │ blob │
//! └──────────────┘   └────────────┘   └───────────┘   └────────┬─────────┘
//!                                                              │
//!                                     ┌────────────────────────┤
//!                                     ▼                        ▼
//!                                ┌──────────┐            ┌──────────┐
//!                                │   CLI    │            │   HTTP   │
//!                                └──────────┘            └──────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types and the index wire shape |
//! | [`extract`] | Per-format page text extraction |
//! | [`chunk`] | Sliding-window chunking and chunk ids |
//! | [`store`] | Index persistence over KV and object stores |
//! | [`indexer`] | Seed and upload index builds |
//! | [`server`] | HTTP gateway |

pub mod chunk;
pub mod config;
pub mod extract;
pub mod indexer;
pub mod models;
pub mod server;
pub mod store;
