pub mod auth;
pub mod email;
pub mod password_reset;

pub use email::{EmailService, LogMailer, Mailer};
pub use password_reset::{PasswordResetOptions, PasswordResetService};
