//! Reviewer assignment and pull request lifecycle.
//!
//! ```text
//!   api ──▶ lifecycle ──▶ selector
//!    │          │
//!    │          ▼
//!    └──▶ roster ──▶ db::StoreTx ── implements ── store / directory / workload
//! ```
//!
//! - [`directory`]: user and team lookups
//! - [`workload`]: open-review counts per user
//! - [`selector`]: least-loaded reviewer ranking
//! - [`store`]: transactional persistence contract
//! - [`db`]: SQLite implementation and the async `DbHandle`
//! - [`lifecycle`]: create, merge and reassign
//! - [`roster`]: team and user administration
//! - [`api`] and [`server`]: HTTP surface

pub mod api;
pub mod db;
pub mod directory;
pub mod lifecycle;
pub mod models;
pub mod roster;
pub mod selector;
pub mod server;
pub mod store;
pub mod workload;
