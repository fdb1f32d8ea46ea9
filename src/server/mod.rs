pub mod handlers;
pub mod ratelimit;
pub mod router;
