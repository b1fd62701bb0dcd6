//! Loam core library
//!
//! Shared foundation for the Loam runtime: the value model, persistent
//! collections, the garbage-collected heap, the scratch arena, and the
//! intermediate representations (Form, Node, Chunk) that the compiler
//! produces and both evaluation backends consume.
//!
//! Nothing in this crate evaluates code. Realizing a lazy sequence or
//! calling a function requires an evaluator, so that logic lives in
//! `loam-runtime`; this crate only defines the data those operations
//! work over.

pub mod arena;
pub mod chunk;
pub mod collections;
pub mod diagnostics;
pub mod form;
pub mod heap;
pub mod lazy;
pub mod node;
pub mod printer;
pub mod value;

pub use arena::Scratch;
pub use chunk::{Chunk, FnProto, Op};
pub use diagnostics::{Diagnostic, ErrorKind, SourcePos};
pub use form::{Form, FormKind};
pub use heap::{Heap, HeapObj, ObjRef};
pub use node::{FnArityNode, Node, NodeKind};
pub use value::{BuiltinArity, FnArity, FnBody, Function, Sym, Value};
