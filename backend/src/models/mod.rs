// src/models/mod.rs

pub mod attempt;
pub mod identity;
pub mod ledger;
pub mod quiz;
