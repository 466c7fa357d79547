pub mod rate_limit;
pub mod reset_token;

pub use rate_limit::RateLimitRecord;
pub use reset_token::{ResetToken, Verification};
