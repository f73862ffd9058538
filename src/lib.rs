pub mod api;
pub mod ast;
pub mod binary;
pub mod env;
pub mod error;
pub mod lexer;
pub mod parser;
pub mod render;
pub mod resolver;
pub mod schema;
mod serialization;
pub mod validator;

pub use api::{analyze, analyze_file, analyze_with, Analysis};
pub use ast::{Document, EnumDefinition, Object, Param, Value};
pub use error::{CfgError, ErrorReport, ValidationError};
pub use parser::{Parser, ParserOptions};
pub use schema::Schema;
pub use validator::{ValidationContext, ValidationReport};
