pub mod ast;
pub mod cancel;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod interpreter;
pub mod parser;
pub mod prepared;
mod span;
mod sync;
pub mod tokenizer;
pub mod value;

pub use self::{
    engine::Engine,
    error::{Error, ExecutionError, ExecutionErrorKind, Level},
    span::Span,
    value::Value,
};
