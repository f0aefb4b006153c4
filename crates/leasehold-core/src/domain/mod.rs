//! Domain model (ids, envelope, locations, errors).

pub mod envelope;
pub mod errors;
pub mod ids;
pub mod state;

pub use self::envelope::Envelope;
pub use self::errors::{ErrorKind, QueueError};
pub use self::ids::{JobId, ParseJobIdError};
pub use self::state::{Location, SlotState};
