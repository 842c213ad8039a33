//! Common types for replio
//!
//! Identifiers, epoch-qualified versions, configuration and the shared
//! error taxonomy used by every other crate in the workspace.

pub mod config;
pub mod error;
pub mod types;

pub use config::{PgConfig, ReplicationMode};
pub use error::{Error, Result};
pub use types::{
    ClientId, Entity, Epoch, EVersion, ObjectId, ObjectName, OsdId, PgId, ReqId, Rev, Tid,
};
