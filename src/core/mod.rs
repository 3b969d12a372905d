//! Core types shared by the registry, its backends and the clock façade.

pub mod schedule;
pub mod types;
