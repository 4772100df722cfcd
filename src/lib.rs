//! Sincronização de pedidos entre a API do Tiny ERP e o integrador.

pub mod cli;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod format;
pub mod integrator;
pub mod logging;
pub mod model;
pub mod operations;
pub mod orchestrator;
pub mod state_machine;
pub mod store;
pub mod tiny;
pub mod ui;
pub mod webhook;
