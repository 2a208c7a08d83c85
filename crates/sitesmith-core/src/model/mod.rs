mod billing;
mod conversation;
mod project;
mod timeline;
mod user;
mod version;

pub use billing::*;
pub use conversation::*;
pub use project::*;
pub use timeline::*;
pub use user::*;
pub use version::*;
