//! Userboot shared code.
//!
//! Common error types, boot constants and filesystem layout helpers used by
//! the init binary and by the test utilities that drive it.

pub mod constants;
pub mod errors;
pub mod layout;

pub use errors::{BootError, BootResult};
pub use layout::{RootLayout, UsersLayout};
