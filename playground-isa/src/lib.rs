// See the corresponding attribute in playground_vm/lib.rs
#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

pub use twenty_first;

pub mod error;
pub mod instruction;
pub mod op_stack;
pub mod parser;
pub mod program;

/// Compile an entire program from source code, with string-like
/// interpolation of arguments.
///
/// # Examples
///
/// ```
/// # use playground_isa::playground_program;
/// let summand = 5;
/// let program = playground_program!(
///     "proc.add_{summand} add.{summand} end
///     begin
///         push.1 exec.add_{summand}
///     end"
/// );
/// assert_eq!(4, program.len());
/// ```
///
/// # Panics
///
/// **Panics** if the program cannot be parsed or lowered, for example because
/// of a misspelled instruction or an unknown procedure. For a version that
/// returns a `Result`, see [`Program::from_code()`][from_code].
///
/// [from_code]: program::Program::from_code
#[macro_export]
macro_rules! playground_program {
    ($($format_args:tt)*) => {{
        let source_code = format!($($format_args)*);
        match $crate::program::Program::from_code(&source_code) {
            Ok(program) => program,
            Err(err) => panic!("{err}"),
        }
    }};
}
