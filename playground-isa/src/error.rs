pub use crate::op_stack::ArgumentError;
pub use crate::parser::ParseError;
pub use crate::program::ProgramError;
