pub mod packet;
pub mod udp;

pub use packet::*;
pub use udp::*;
