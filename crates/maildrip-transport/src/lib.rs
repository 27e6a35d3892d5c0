//! # Maildrip Transport
//!
//! Implementations of the [`maildrip_core::traits::Transport`] seam:
//! an async SMTP mailer built on lettre for production, and a log-only
//! transport for everything else.

pub mod log;
pub mod smtp;

pub use log::LogTransport;
pub use smtp::SmtpMailer;
