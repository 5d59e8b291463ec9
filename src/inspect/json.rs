use std::io::Write;

use crate::{AtomInspector, FormatHint, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ContextKind {
    TopLevel,
    Atom,
    Array,
    Object,
}

#[derive(Debug)]
struct Context {
    kind: ContextKind,
    field_count: usize,
    children_count: usize,
}

impl Context {
    fn new(kind: ContextKind) -> Self {
        Context {
            kind,
            field_count: 0,
            children_count: 0,
        }
    }
}

/// Renders the tree as a JSON document: a top-level array of atom objects,
/// each carrying `name`, `header_size`, `size`, the non-zero `version` and
/// `flags`, and a `children` array when the atom has children.
///
/// The closing bracket is written by [JsonInspector::finish], which must be
/// called once the last atom has been inspected.
#[derive(Debug)]
pub struct JsonInspector<W: Write> {
    writer: W,
    contexts: Vec<Context>,
    prefix: String,
}

impl<W: Write> JsonInspector<W> {
    pub fn new(mut writer: W) -> Result<Self> {
        writer.write_all(b"[\n")?;

        let mut inspector = JsonInspector {
            writer,
            contexts: Vec::new(),
            prefix: String::new(),
        };
        inspector.push(ContextKind::TopLevel);

        Ok(inspector)
    }

    /// Close the top-level array and hand back the writer.
    pub fn finish(mut self) -> Result<W> {
        self.writer.write_all(b"\n]\n")?;

        Ok(self.writer)
    }

    fn push(&mut self, kind: ContextKind) {
        self.contexts.push(Context::new(kind));
        self.prefix = "  ".repeat(self.contexts.len());
    }

    fn pop(&mut self) {
        self.contexts.pop();
        self.prefix = "  ".repeat(self.contexts.len());
    }

    fn last(&mut self) -> &mut Context {
        self.contexts.last_mut().expect("inspector context underflow")
    }

    // Emit the `,\n` separator before every field but the first.
    fn on_field_added(&mut self) -> Result<()> {
        if self.last().field_count > 0 {
            self.writer.write_all(b",\n")?;
        }
        self.last().field_count += 1;

        Ok(())
    }

    fn field_name(&mut self, name: Option<&str>) -> Result<()> {
        if let Some(name) = name {
            write!(self.writer, "\"{}\": ", escape_json(name.as_bytes()))?;
        }

        Ok(())
    }
}

impl<W: Write> AtomInspector for JsonInspector<W> {
    fn start_atom(
        &mut self,
        name: &str,
        version: u8,
        flags: u32,
        header_size: u32,
        size: u64,
    ) -> Result<()> {
        self.on_field_added()?;
        self.last().children_count += 1;

        // the first nested atom opens the enclosing atom's children array
        if self.last().kind == ContextKind::Atom && self.last().children_count == 1 {
            write!(self.writer, "{}\"children\":[ \n", self.prefix)?;
        }

        write!(self.writer, "{}{{\n", self.prefix)?;
        self.push(ContextKind::Atom);

        self.on_field_added()?;
        write!(
            self.writer,
            "{}\"name\": \"{}\"",
            self.prefix,
            escape_json(name.as_bytes())
        )?;

        self.on_field_added()?;
        write!(self.writer, "{}\"header_size\": {}", self.prefix, header_size)?;

        self.on_field_added()?;
        write!(self.writer, "{}\"size\": {}", self.prefix, size)?;

        if version != 0 {
            self.on_field_added()?;
            write!(self.writer, "{}\"version\": {}", self.prefix, version)?;
        }

        if flags != 0 {
            self.on_field_added()?;
            write!(self.writer, "{}\"flags\": {}", self.prefix, flags)?;
        }

        Ok(())
    }

    fn end_atom(&mut self) -> Result<()> {
        if self.last().children_count > 0 {
            self.writer.write_all(b"]")?;
        }

        self.pop();

        write!(self.writer, "\n{}}}", self.prefix)?;

        Ok(())
    }

    fn start_descriptor(&mut self, name: &str, header_size: u32, size: u64) -> Result<()> {
        self.start_atom(name, 0, 0, header_size, size)
    }

    fn start_array(&mut self, name: Option<&str>, _count: usize) -> Result<()> {
        self.on_field_added()?;
        write!(self.writer, "{}", self.prefix)?;
        self.field_name(name)?;
        self.writer.write_all(b"[\n")?;
        self.push(ContextKind::Array);

        Ok(())
    }

    fn end_array(&mut self) -> Result<()> {
        self.pop();
        write!(self.writer, "\n{}]", self.prefix)?;

        Ok(())
    }

    fn start_object(&mut self, name: Option<&str>, _fields: usize, _compact: bool) -> Result<()> {
        self.on_field_added()?;
        write!(self.writer, "{}", self.prefix)?;
        self.field_name(name)?;
        self.writer.write_all(b"{\n")?;
        self.push(ContextKind::Object);

        Ok(())
    }

    fn end_object(&mut self) -> Result<()> {
        self.pop();
        write!(self.writer, "\n{}}}", self.prefix)?;

        Ok(())
    }

    fn add_str(&mut self, name: Option<&str>, value: &str) -> Result<()> {
        self.on_field_added()?;
        write!(self.writer, "{}", self.prefix)?;
        self.field_name(name)?;
        write!(self.writer, "\"{}\"", escape_json(value.as_bytes()))?;

        Ok(())
    }

    fn add_uint(&mut self, name: Option<&str>, value: u64, _hint: FormatHint) -> Result<()> {
        self.on_field_added()?;
        write!(self.writer, "{}", self.prefix)?;
        self.field_name(name)?;
        write!(self.writer, "{}", value)?;

        Ok(())
    }

    fn add_float(&mut self, name: Option<&str>, value: f32) -> Result<()> {
        self.on_field_added()?;
        write!(self.writer, "{}", self.prefix)?;
        self.field_name(name)?;
        write!(self.writer, "{:.6}", value)?;

        Ok(())
    }

    fn add_bytes(&mut self, name: Option<&str>, bytes: &[u8]) -> Result<()> {
        self.on_field_added()?;
        write!(self.writer, "{}", self.prefix)?;
        self.field_name(name)?;
        self.writer.write_all(b"\"[")?;
        for (i, b) in bytes.iter().enumerate() {
            if i > 0 {
                self.writer.write_all(b" ")?;
            }
            write!(self.writer, "{:02x}", b)?;
        }
        self.writer.write_all(b"]\"")?;

        Ok(())
    }
}

// Read one code point from a UTF-8 byte sequence, validating the
// continuation bytes. Returns the code point and its encoded length.
fn read_utf8(input: &[u8]) -> Option<(u32, usize)> {
    let c = *input.first()? as u32;
    if c & 0x80 == 0 {
        return Some((c, 1));
    }

    if input.len() < 2 || input[1] & 0xc0 != 0x80 {
        return None;
    }

    if c & 0xe0 == 0xe0 {
        if input.len() < 3 || input[2] & 0xc0 != 0x80 {
            return None;
        }

        if c & 0xf0 == 0xf0 {
            if c & 0xf8 != 0xf0 || input.len() < 4 || input[3] & 0xc0 != 0x80 {
                return None;
            }
            let v = (c & 0x07) << 18
                | (input[1] as u32 & 0x3f) << 12
                | (input[2] as u32 & 0x3f) << 6
                | (input[3] as u32 & 0x3f);
            Some((v, 4))
        } else {
            let v = (c & 0x0f) << 12 | (input[1] as u32 & 0x3f) << 6 | (input[2] as u32 & 0x3f);
            Some((v, 3))
        }
    } else {
        let v = (c & 0x1f) << 6 | (input[1] as u32 & 0x3f);
        Some((v, 2))
    }
}

/// Escape a string for inclusion in a JSON document: `"` and `\` get a
/// backslash, control characters become `\u00XX`, everything else passes
/// through. An invalid UTF-8 sequence truncates the string rather than
/// failing the inspection.
pub(crate) fn escape_json(input: &[u8]) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while !rest.is_empty() {
        let (code_point, len) = match read_utf8(rest) {
            Some(decoded) => decoded,
            None => break,
        };

        if code_point == u32::from(b'"') || code_point == u32::from(b'\\') {
            out.push('\\');
            out.push(code_point as u8 as char);
        } else if code_point <= 0x1f {
            out.push_str(&format!("\\u00{:02X}", code_point));
        } else {
            match char::from_u32(code_point) {
                Some(c) => out.push(c),
                None => break,
            }
        }

        rest = &rest[len..];
    }

    out
}
