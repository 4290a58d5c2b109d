//! Facility billing service: statement and journal reconciliation plus
//! transaction search for core-facility billing.

pub mod config;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod observability;
pub mod services;
pub mod startup;
