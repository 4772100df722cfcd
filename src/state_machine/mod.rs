mod job;
mod state;

pub use job::{FailureKind, RateLimit, RatePeriod, RetryConfig, Task, TaskKind};
pub use state::{InvoiceStatus, OrderStatus, StateMachine, Transition};
