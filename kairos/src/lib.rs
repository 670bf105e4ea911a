//! Kairos: a focus timer daemon that cycles work, delay and break phases,
//! groups completed work periods into sessions and asks a language model
//! for reminders, break check-ins and session reports.

pub mod aggregator;
pub mod ai;
pub mod config;
pub mod engine;
pub mod events;
pub mod export;
pub mod extract;
pub mod ipc;
pub mod model;
pub mod notify;
pub mod runtime;
pub mod settings;
pub mod store;
