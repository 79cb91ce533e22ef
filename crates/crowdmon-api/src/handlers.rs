//! Request handlers.

pub mod assets;
pub mod health;
pub mod jobs;
pub mod system;

pub use assets::*;
pub use health::*;
pub use jobs::*;
pub use system::*;
