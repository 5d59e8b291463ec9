mod json;
mod text;

pub use json::*;
pub use text::*;

use crate::Result;

/// Rendering hint for unsigned integer fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatHint {
    Dec,
    Hex,
}

/// Visitor used to render an atom tree in a diagnostic format.
///
/// Atoms describe themselves by invoking these methods in document order:
/// `start_atom`, the header-derived and payload fields, any children, then
/// `end_atom`. Descriptors do the same with the descriptor variants.
pub trait AtomInspector {
    fn start_atom(
        &mut self,
        name: &str,
        version: u8,
        flags: u32,
        header_size: u32,
        size: u64,
    ) -> Result<()>;

    fn end_atom(&mut self) -> Result<()>;

    fn start_descriptor(&mut self, name: &str, header_size: u32, size: u64) -> Result<()>;

    fn end_descriptor(&mut self) -> Result<()> {
        self.end_atom()
    }

    fn start_array(&mut self, name: Option<&str>, count: usize) -> Result<()>;
    fn end_array(&mut self) -> Result<()>;

    fn start_object(&mut self, name: Option<&str>, fields: usize, compact: bool) -> Result<()>;
    fn end_object(&mut self) -> Result<()>;

    fn add_str(&mut self, name: Option<&str>, value: &str) -> Result<()>;
    fn add_uint(&mut self, name: Option<&str>, value: u64, hint: FormatHint) -> Result<()>;
    fn add_float(&mut self, name: Option<&str>, value: f32) -> Result<()>;
    fn add_bytes(&mut self, name: Option<&str>, bytes: &[u8]) -> Result<()>;
}
