//! Hash-chained audit ledger with proof of work, served over REST.

pub mod api;
pub mod config;
pub mod ledger;
