//! Domain records shared by the write path (sync) and the read path (feed).

mod user;
mod video;

pub use user::*;
pub use video::*;
