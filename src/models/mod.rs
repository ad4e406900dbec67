// Data models (structs)
pub mod dataset;
pub mod job;
pub mod messages;
pub mod scored_result;
pub mod settings;

pub use dataset::*;
pub use job::*;
pub use messages::*;
pub use scored_result::*;
pub use settings::*;
