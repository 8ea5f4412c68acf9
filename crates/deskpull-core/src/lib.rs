pub mod endpoints;
pub mod enrich;
pub mod error;
pub mod fetcher;
pub mod html;
pub mod models;
pub mod pool;
pub mod pull;
pub mod rate_limit;
pub mod sink;
pub mod traits;

#[cfg(test)]
mod testutil;

pub use error::AppError;
pub use models::{Contact, PullResult, Thread, Ticket};
pub use pull::{
    PullEvent, PullOptions, PullReporter, PullService, TimeWindow, TracingPullReporter,
};
pub use rate_limit::{RateLimitConfig, RateLimiter};
pub use sink::FileSink;
pub use traits::{ApiResponse, TicketSink, TokenProvider, Transport};
