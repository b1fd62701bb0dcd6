//! Embedded WebAssembly interop - interface only
//!
//! The runtime consumes a host bridge through this trait; the bridge
//! itself (module instantiation, memory, the actual engine) is an
//! external collaborator installed by the front end. Without a host the
//! wasm builtins report a runtime error.

/// Scalar values crossing the wasm boundary.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum WasmScalar {
    I64(i64),
    F64(f64),
}

/// Host bridge consumed by the wasm builtins.
pub trait WasmHost {
    /// Load (or locate) a module by name, returning its export names.
    fn load(&mut self, name: &str) -> Result<Vec<String>, String>;

    /// Invoke an exported function with scalar arguments.
    fn invoke(
        &mut self,
        module: &str,
        export: &str,
        args: &[WasmScalar],
    ) -> Result<WasmScalar, String>;
}
