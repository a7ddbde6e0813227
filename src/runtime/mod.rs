pub mod error;
pub mod heap;
pub mod interpreter;
pub mod value;

pub use interpreter::Machine;
