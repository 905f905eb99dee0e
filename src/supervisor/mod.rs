//! Runtime supervision: lifecycle, retries and the adapter facade.

mod adapter;
mod derived;
mod error;
mod retry;
mod snapshot;
mod state;

pub use adapter::*;
pub use derived::*;
pub use error::AdapterError;
pub use retry::*;
pub use snapshot::*;
pub use state::*;
