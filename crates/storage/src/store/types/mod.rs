#![forbid(unsafe_code)]

mod audit;
mod fleet;
mod jobs;
mod proposals;
mod rollback_jobs;

pub use audit::*;
pub use fleet::*;
pub use jobs::*;
pub use proposals::*;
pub use rollback_jobs::*;
