pub mod client;
pub mod types;

pub use client::{Integrator, IntegratorClient};
pub use types::{CustomerPayload, IntegratorOrder, IntegratorPage, ItemPayload, OrderPayload};
