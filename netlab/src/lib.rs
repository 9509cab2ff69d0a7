pub mod address;
pub mod compile;
pub mod error;
pub mod grapher;
pub mod topology;

pub use address::{Ipv4Cidr, Visibility};
pub use compile::{CompilerConfig, compile};
pub use error::CompileError;
pub use topology::Topology;
