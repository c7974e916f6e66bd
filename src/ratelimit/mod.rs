//! Rate limiting logic.

mod identifier;
mod limiter;
mod limits;

pub use identifier::{Identifier, IdentifierKind};
pub use limiter::{Decision, RateLimiter, WINDOW};
pub use limits::{parse_token_limits, LimitTable};
