//! Room registry for tworooms.
//!
//! The registry is the single source of truth for every [`Room`]
//! aggregate. All other components read and write rooms through it, and
//! every read-modify-write happens under the registry's own lock via
//! [`RoomRegistry::update_with`], so two writers never interleave on the
//! same room.
//!
//! [`Room`]: tworooms_protocol::Room

mod error;
mod registry;

pub use error::RegistryError;
pub use registry::{Disposition, RoomRegistry};
