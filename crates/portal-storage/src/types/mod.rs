//! Type definitions for portal storage.

mod affiliation;
mod content;
mod ids;
mod invites;
mod organizations;
mod roles;
mod tasks;
mod teams;
mod users;

// Re-export all types from submodules
pub use affiliation::*;
pub use content::*;
pub use ids::*;
pub use invites::*;
pub use organizations::*;
pub use roles::*;
pub use tasks::*;
pub use teams::*;
pub use users::*;
