//! The only integration test crate

pub mod test_compile;
pub mod test_syntax;
pub mod test_vm;

// defines test case DSL
pub mod util;
