//! Whitelisted command language for snapshot recovery routines.
//!
//! Routines can only set variables, emit text, wait, fail, and return a
//! value. There is no file, network, or process access.

pub mod interpreter;
pub mod parser;

pub use interpreter::{Sandbox, SandboxContext, SandboxOutput};
pub use parser::{parse_routine, ParseError, Routine};
