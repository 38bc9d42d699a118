pub mod controller;
pub mod engine;
pub mod listener;
pub mod receiver;
pub mod store;
pub mod workers;

pub use controller::*;
pub use engine::*;
pub use listener::*;
pub use receiver::*;
pub use store::*;
pub use workers::*;
