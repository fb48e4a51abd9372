mod error;
mod loadcase;
mod network;
mod partition;
mod piecewise;
mod ybus;

pub mod debug;
pub mod math;


pub use error::*;
pub use loadcase::*;
pub use network::*;
pub use partition::*;
pub use piecewise::*;
pub use ybus::*;
