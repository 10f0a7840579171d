//! Shared types for the hearth gateway client: entity records, the gateway
//! wire protocol and error types.

pub mod asset;
pub mod error;
pub mod models;
pub mod protocol;

pub use asset::*;
pub use error::*;
pub use models::*;
pub use protocol::*;
