//! Configuration types shared by the cache engine and the runner binary.
//!
//! [`shared`] holds the serde-backed configuration structs, [`load_config`] layers YAML files and
//! `APP_` prefixed environment variables on top of each other.

mod environment;
mod load;
mod secret;
pub mod shared;

pub use environment::*;
pub use load::*;
pub use secret::*;
