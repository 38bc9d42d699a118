pub mod json;
pub mod line;
pub mod report;

pub use json::*;
pub use line::*;
pub use report::*;
