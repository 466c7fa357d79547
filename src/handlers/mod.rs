pub mod client;
pub mod health;
pub mod password_reset;

pub use client::ClientIp;
pub use health::health_check;
pub use password_reset::{forgot_password, reset_password, verify_reset_token};
