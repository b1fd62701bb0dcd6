//! Loam compiler library
//!
//! The three-phase front end (Tokenizer -> Reader -> Analyzer) plus the
//! bytecode compiler. Forms live in the caller's scratch arena; Nodes and
//! Chunks are owned and outlive it. The Analyzer talks to the runtime's
//! environment through the [`VarResolver`] trait, which is the only seam
//! between this crate and evaluation.

pub mod analyzer;
pub mod builder;
pub mod codegen;
pub mod destructure;
pub mod macros;
pub mod reader;
pub mod syntax_quote;
pub mod token;

pub use analyzer::{Analyzer, VarResolver};
pub use codegen::compile_top;
pub use reader::Reader;
pub use token::{Token, TokenKind, Tokenizer};
