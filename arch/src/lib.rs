pub mod code;
pub mod reg;
pub mod tables;

pub use code::*;
pub use reg::Reg;
