//! SATMINER — rare-sat custody and fund-rotation engine.
//!
//! Periodically sweeps a public collection address through an external
//! rare-sat extraction service: scarce satoshis are routed to custody
//! wallets, common ones are deposited at an exchange, and accumulated
//! exchange balances are withdrawn back on-chain.

pub mod config;
pub mod engine;
pub mod exchanges;
pub mod extractor;
pub mod fees;
pub mod notifications;
pub mod types;
pub mod wallet;
