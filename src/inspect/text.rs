use std::io::Write;

use crate::{AtomInspector, FormatHint, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ContextKind {
    TopLevel,
    Atom,
    Array,
    Object,
    CompactObject,
}

#[derive(Debug)]
struct Context {
    kind: ContextKind,
    index: usize,
}

impl Context {
    fn new(kind: ContextKind) -> Self {
        Context { kind, index: 0 }
    }
}

/// Renders the tree as indented text, one atom or field per line.
///
/// Atom lines look like `[moov] size=8+1024`; full atoms append
/// `, version=V` and `, flags=X` (hex) when non-zero. Array elements are
/// prefixed with their index, and compact objects render all of their
/// fields on a single line.
#[derive(Debug)]
pub struct TextInspector<W: Write> {
    writer: W,
    contexts: Vec<Context>,
}

impl<W: Write> TextInspector<W> {
    pub fn new(writer: W) -> Self {
        TextInspector {
            writer,
            contexts: vec![Context::new(ContextKind::TopLevel)],
        }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }

    fn last(&mut self) -> &mut Context {
        self.contexts.last_mut().expect("inspector context underflow")
    }

    fn prefix(&mut self) -> Result<()> {
        if self.last().kind == ContextKind::CompactObject {
            if self.last().index > 0 {
                write!(self.writer, ", ")?;
            }
            self.last().index += 1;
            return Ok(());
        }

        let indent = (self.contexts.len() - 1) * 2;
        write!(self.writer, "{:indent$}", "")?;

        if self.last().kind == ContextKind::Array {
            let index = self.last().index;
            write!(self.writer, "({:8}) ", index)?;
            self.last().index += 1;
        }

        Ok(())
    }

    fn suffix(&mut self) -> Result<()> {
        if self.last().kind != ContextKind::CompactObject {
            writeln!(self.writer)?;
        }

        Ok(())
    }

    fn name(&mut self, name: Option<&str>) -> Result<()> {
        if let Some(name) = name {
            write!(self.writer, "{} = ", name)?;
        }

        Ok(())
    }
}

// Full-atom header lengths, with and without the 64-bit size and uuid
// extensions; version/flags are only meaningful for these.
fn is_full_header(header_size: u32) -> bool {
    matches!(header_size, 12 | 20 | 28 | 36)
}

impl<W: Write> AtomInspector for TextInspector<W> {
    fn start_atom(
        &mut self,
        name: &str,
        version: u8,
        flags: u32,
        header_size: u32,
        size: u64,
    ) -> Result<()> {
        self.prefix()?;
        self.contexts.push(Context::new(ContextKind::Atom));

        write!(
            self.writer,
            "[{}] size={}+{}",
            name,
            header_size,
            size - header_size as u64
        )?;

        if is_full_header(header_size) {
            if version != 0 && flags != 0 {
                write!(self.writer, ", version={}, flags={:x}", version, flags)?;
            } else if version != 0 {
                write!(self.writer, ", version={}", version)?;
            } else if flags != 0 {
                write!(self.writer, ", flags={:x}", flags)?;
            }
        }

        self.suffix()
    }

    fn end_atom(&mut self) -> Result<()> {
        self.contexts.pop();

        Ok(())
    }

    fn start_descriptor(&mut self, name: &str, header_size: u32, size: u64) -> Result<()> {
        self.prefix()?;
        self.contexts.push(Context::new(ContextKind::Atom));

        write!(
            self.writer,
            "[{}] size={}+{}",
            name,
            header_size,
            size - header_size as u64
        )?;

        self.suffix()
    }

    fn start_array(&mut self, name: Option<&str>, _count: usize) -> Result<()> {
        self.prefix()?;
        self.contexts.push(Context::new(ContextKind::Array));

        if let Some(name) = name {
            write!(self.writer, "{}:", name)?;
        }

        self.suffix()
    }

    fn end_array(&mut self) -> Result<()> {
        self.contexts.pop();

        Ok(())
    }

    fn start_object(&mut self, name: Option<&str>, _fields: usize, compact: bool) -> Result<()> {
        self.prefix()?;
        self.contexts.push(Context::new(if compact {
            ContextKind::CompactObject
        } else {
            ContextKind::Object
        }));

        if let Some(name) = name {
            write!(self.writer, "{}: ", name)?;
        }

        self.suffix()
    }

    fn end_object(&mut self) -> Result<()> {
        if self.last().kind == ContextKind::CompactObject {
            writeln!(self.writer)?;
        }
        self.contexts.pop();

        Ok(())
    }

    fn add_str(&mut self, name: Option<&str>, value: &str) -> Result<()> {
        self.prefix()?;
        self.name(name)?;
        write!(self.writer, "{}", value)?;
        self.suffix()
    }

    fn add_uint(&mut self, name: Option<&str>, value: u64, hint: FormatHint) -> Result<()> {
        self.prefix()?;
        self.name(name)?;
        match hint {
            FormatHint::Hex => write!(self.writer, "{:x}", value)?,
            FormatHint::Dec => write!(self.writer, "{}", value)?,
        }
        self.suffix()
    }

    fn add_float(&mut self, name: Option<&str>, value: f32) -> Result<()> {
        self.prefix()?;
        self.name(name)?;
        write!(self.writer, "{:.6}", value)?;
        self.suffix()
    }

    fn add_bytes(&mut self, name: Option<&str>, bytes: &[u8]) -> Result<()> {
        self.prefix()?;
        self.name(name)?;
        write!(self.writer, "[")?;
        for (i, b) in bytes.iter().enumerate() {
            if i > 0 {
                write!(self.writer, " ")?;
            }
            write!(self.writer, "{:02x}", b)?;
        }
        write!(self.writer, "]")?;
        self.suffix()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn render(f: impl FnOnce(&mut TextInspector<Vec<u8>>) -> Result<()>) -> String {
        let mut inspector = TextInspector::new(Vec::new());
        f(&mut inspector).unwrap();
        String::from_utf8(inspector.into_inner()).unwrap()
    }

    #[test]
    fn test_atom_line() {
        let out = render(|i| {
            i.start_atom("moov", 0, 0, 8, 108)?;
            i.start_atom("mvhd", 1, 2, 12, 32)?;
            i.add_uint(Some("timescale"), 1000, FormatHint::Dec)?;
            i.end_atom()?;
            i.end_atom()
        });

        assert_eq!(
            out,
            "[moov] size=8+100\n  [mvhd] size=12+20, version=1, flags=2\n    timescale = 1000\n"
        );
    }

    #[test]
    fn test_flags_hex() {
        let out = render(|i| {
            i.start_atom("tkhd", 0, 0x000f, 12, 92)?;
            i.end_atom()
        });

        assert_eq!(out, "[tkhd] size=12+80, flags=f\n");
    }

    #[test]
    fn test_array_prefix() {
        let out = render(|i| {
            i.start_array(Some("entries"), 2)?;
            i.add_uint(None, 7, FormatHint::Dec)?;
            i.add_uint(None, 8, FormatHint::Dec)?;
            i.end_array()
        });

        assert_eq!(out, "entries:\n  (       0) 7\n  (       1) 8\n");
    }

    #[test]
    fn test_compact_object() {
        let out = render(|i| {
            i.start_object(Some("entry"), 2, true)?;
            i.add_uint(Some("first"), 1, FormatHint::Dec)?;
            i.add_uint(Some("second"), 2, FormatHint::Dec)?;
            i.end_object()
        });

        assert_eq!(out, "entry: first = 1, second = 2\n");
    }

    #[test]
    fn test_bytes_dump() {
        let out = render(|i| i.add_bytes(Some("data"), &[0xde, 0xad, 0xbe]));
        assert_eq!(out, "data = [de ad be]\n");
    }
}
