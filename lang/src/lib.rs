extern crate pest;
#[macro_use]
extern crate pest_derive;

pub mod runtime;
pub mod syntax;
