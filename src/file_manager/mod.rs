pub mod json_ops;
pub mod locations;

pub use json_ops::*;
pub use locations::{join_location, read_json_lines};
