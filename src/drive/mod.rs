//! Google Drive v3 access: folder listing with transparent pagination and
//! chunked content retrieval, behind the `DriveSession` trait so the
//! download engine can be exercised without a network.

pub mod error;
#[cfg(test)]
pub(crate) mod fake;
pub mod lister;
pub mod queries;
pub mod session;
pub mod types;

pub use error::RemoteAccessError;
pub use lister::list_entries;
pub use session::{ByteStream, DriveSession, HttpDriveSession, SessionSource};
pub use types::{ListFilter, RemoteEntry};
