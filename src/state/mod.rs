pub mod clock;
pub mod context;
pub mod record;
pub mod session;

pub use clock::*;
pub use context::*;
pub use record::*;
pub use session::*;
