pub mod client;
pub mod decoder;
pub mod types;

pub use client::{OrderSource, TinyClient};
pub use decoder::TinyResponse;
pub use types::{CustomerData, ExpeditionInfo, InvoiceDetail, OrderDetail, OrderItemData, OrderSummary};
