//! Command implementations for ismart-cli

pub mod call;
pub mod login;

pub use call::{call, CallArgs};
pub use login::login;
