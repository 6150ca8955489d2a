pub mod core;
pub mod services;
pub mod utils;

pub use crate::services::batch::generate_story_illustrations;
pub use crate::services::cover::generate_cover_illustration;
