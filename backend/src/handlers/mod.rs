// src/handlers/mod.rs

pub mod attempts;
pub mod dashboard;
pub mod ledgers;
pub mod maintenance;
