pub mod config;
pub mod error;
pub mod identity;
pub mod types;

pub use config::ParleyConfig;
pub use error::{ParleyError, Result};
pub use identity::{IdentityStore, SessionIdentity};
pub use types::*;
