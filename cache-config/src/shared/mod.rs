mod base;
mod cache;
mod credentials;
mod pool;
mod retry;
mod runner;

pub use base::*;
pub use cache::*;
pub use credentials::*;
pub use pool::*;
pub use retry::*;
pub use runner::*;
