pub mod error;
pub mod persist;
pub mod session;
pub mod snapshot;

pub use error::PersistenceError;
pub use persist::{load_session, save_session};
pub use session::Session;
pub use snapshot::{ResultRecord, SessionSnapshot, SNAPSHOT_VERSION};
