//! Subscription Service - reconciles extracted subscription spreadsheets against recorded trades.

pub mod config;
pub mod handlers;
pub mod models;
pub mod reconcile;
pub mod services;
pub mod startup;
pub mod workflow;
