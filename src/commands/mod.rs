//! CLI commands implementation

pub mod init;
pub mod policies;
pub mod status;
pub mod sync;

pub use init::*;
pub use policies::*;
pub use status::*;
pub use sync::*;
