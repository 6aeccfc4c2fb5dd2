#![forbid(unsafe_code)]

#[macro_use]
extern crate maplit;

mod util;

pub mod ast;
pub mod error;
pub mod frontend;
pub mod ir;
pub mod macros;
pub mod schema;

#[cfg(test)]
pub(crate) mod test_util;

pub use crate::error::CompilerError;
pub use crate::frontend::{graphql_doc_to_ir, graphql_to_ir, graphql_to_ir_with_hints};
pub use crate::ir::IrAndMetadata;
pub use crate::macros::{
    perform_macro_expansion, register_macro_edge, MacroEdgeDescriptor, MacroRegistry,
};
pub use crate::schema::Schema;
