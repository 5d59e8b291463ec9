use crate::{
    AtomHeader, AtomId, AtomInspector, ByteStream, Descriptor, EsDescriptor, FourCC, Result,
    UnknownPayload, Uuid, ATOM_HEADER_SIZE, FULL_ATOM_HEADER_SIZE,
};

pub const ATOM_TYPE_UUID: FourCC = FourCC::new(b"uuid");
pub const ATOM_TYPE_MDAT: FourCC = FourCC::new(b"mdat");
pub const ATOM_TYPE_ESDS: FourCC = FourCC::new(b"esds");
pub const ATOM_TYPE_IODS: FourCC = FourCC::new(b"iods");

/// A single box: the common header, the optional extended type of `uuid`
/// atoms, and one of the payload variants.
#[derive(Debug, Clone)]
pub struct Atom {
    pub header: AtomHeader,
    pub uuid: Option<Uuid>,
    pub payload: Payload,
}

/// What an atom holds. Container atoms own their children; everything an
/// operation needs to know about a concrete kind is in the discriminant.
#[derive(Debug, Clone)]
pub enum Payload {
    /// An ordered list of child atoms, owned through the tree.
    Container(Vec<AtomId>),
    /// A payload with no registered parser, buffered or stream-backed.
    Unknown(UnknownPayload),
    /// A null-terminated string payload, zero-padded to the declared size.
    NullString(String),
    /// An `esds` atom: a full atom wrapping an ES descriptor.
    Esds(EsDescriptor),
    /// An `iods` atom: a full atom wrapping an object descriptor.
    Iods(Descriptor),
}

impl Atom {
    /// An empty container atom.
    pub fn container(kind: FourCC) -> Self {
        Atom {
            header: AtomHeader::new(kind),
            uuid: None,
            payload: Payload::Container(Vec::new()),
        }
    }

    /// An empty full-atom container with a version and flags.
    pub fn full_container(kind: FourCC, version: u8, flags: u32) -> Self {
        Atom {
            header: AtomHeader::full(kind, version, flags),
            uuid: None,
            payload: Payload::Container(Vec::new()),
        }
    }

    /// A null-terminated string atom.
    pub fn null_string(kind: FourCC, value: &str) -> Self {
        let mut header = AtomHeader::new(kind);
        header.set_size((ATOM_HEADER_SIZE + value.len() as u32 + 1) as u64, false);

        Atom {
            header,
            uuid: None,
            payload: Payload::NullString(value.to_string()),
        }
    }

    /// An unknown atom with a buffered payload.
    pub fn unknown(kind: FourCC, payload: Vec<u8>) -> Self {
        let mut header = AtomHeader::new(kind);
        header.set_size(ATOM_HEADER_SIZE as u64 + payload.len() as u64, false);

        Atom {
            header,
            uuid: None,
            payload: Payload::Unknown(UnknownPayload::Buffered(payload)),
        }
    }

    /// An unknown `uuid` atom with an extended type and buffered payload.
    pub fn unknown_uuid(uuid: Uuid, payload: Vec<u8>) -> Self {
        let mut header = AtomHeader::new(ATOM_TYPE_UUID);
        header.set_size(ATOM_HEADER_SIZE as u64 + 16 + payload.len() as u64, false);

        Atom {
            header,
            uuid: Some(uuid),
            payload: Payload::Unknown(UnknownPayload::Buffered(payload)),
        }
    }

    /// An `esds` atom wrapping the descriptor.
    pub fn esds(descriptor: EsDescriptor) -> Self {
        let mut header = AtomHeader::full(ATOM_TYPE_ESDS, 0, 0);
        header.set_size((FULL_ATOM_HEADER_SIZE + descriptor.size()) as u64, false);

        Atom {
            header,
            uuid: None,
            payload: Payload::Esds(descriptor),
        }
    }

    /// An `iods` atom wrapping the descriptor.
    pub fn iods(descriptor: Descriptor) -> Self {
        let mut header = AtomHeader::full(ATOM_TYPE_IODS, 0, 0);
        header.set_size((FULL_ATOM_HEADER_SIZE + descriptor.size()) as u64, false);

        Atom {
            header,
            uuid: None,
            payload: Payload::Iods(descriptor),
        }
    }

    pub fn kind(&self) -> FourCC {
        self.header.kind
    }

    /// The full on-wire size, header included.
    pub fn size(&self) -> u64 {
        self.header.size()
    }

    /// The header length, including the extended type when present.
    pub fn header_size(&self) -> u32 {
        self.header.header_size() + if self.uuid.is_some() { 16 } else { 0 }
    }

    pub fn payload_size(&self) -> u64 {
        self.size() - self.header_size() as u64
    }

    pub fn is_container(&self) -> bool {
        matches!(self.payload, Payload::Container(_))
    }

    pub(crate) fn children(&self) -> Option<&Vec<AtomId>> {
        match &self.payload {
            Payload::Container(children) => Some(children),
            _ => None,
        }
    }

    pub(crate) fn children_mut(&mut self) -> Option<&mut Vec<AtomId>> {
        match &mut self.payload {
            Payload::Container(children) => Some(children),
            _ => None,
        }
    }

    /// The name shown by inspectors: the printable four-character code, or
    /// the extended type of `uuid` atoms.
    pub fn name(&self) -> String {
        match &self.uuid {
            Some(uuid) => uuid.to_string(),
            None => self.kind().printable(),
        }
    }

    pub(crate) fn write_header(&self, stream: &mut dyn ByteStream) -> Result<()> {
        self.header.write(stream, self.uuid.as_ref())
    }

    // Serialize a leaf payload; container children are written by the tree.
    pub(crate) fn write_fields(&self, stream: &mut dyn ByteStream) -> Result<()> {
        match &self.payload {
            Payload::Container(_) => Ok(()),
            Payload::Unknown(unknown) => unknown.write(self.payload_size(), stream),
            Payload::NullString(value) => {
                if self.payload_size() == 0 {
                    return Ok(());
                }

                stream.write_str(value)?;
                stream.write_u8(0)?;

                let mut padding = self.payload_size().saturating_sub(value.len() as u64 + 1);
                while padding > 0 {
                    stream.write_u8(0)?;
                    padding -= 1;
                }

                Ok(())
            }
            Payload::Esds(descriptor) => descriptor.write(stream),
            Payload::Iods(descriptor) => descriptor.write(stream),
        }
    }

    pub(crate) fn inspect_fields(&self, inspector: &mut dyn AtomInspector) -> Result<()> {
        match &self.payload {
            Payload::Container(_) | Payload::Unknown(_) => Ok(()),
            Payload::NullString(value) => inspector.add_str(Some("string value"), value),
            Payload::Esds(descriptor) => descriptor.inspect(inspector),
            Payload::Iods(descriptor) => descriptor.inspect(inspector),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryStream;

    #[test]
    fn test_null_string_size() {
        let atom = Atom::null_string(FourCC::new(b"name"), "hello");
        assert_eq!(atom.size(), 8 + 6);
        assert_eq!(atom.header_size(), 8);

        let mut stream = MemoryStream::new();
        atom.write_header(&mut stream).unwrap();
        atom.write_fields(&mut stream).unwrap();
        assert_eq!(stream.data(), b"\x00\x00\x00\x0enamehello\x00");
    }

    #[test]
    fn test_unknown_uuid_header() {
        let uuid = Uuid::parse_hex("6d1d9b0542d544e680e2141daff757b2").unwrap();
        let atom = Atom::unknown_uuid(uuid, vec![1, 2, 3, 4]);

        assert_eq!(atom.header_size(), 24);
        assert_eq!(atom.size(), 28);
        assert_eq!(atom.name(), "6d1d9b0542d544e680e2141daff757b2");

        let mut stream = MemoryStream::new();
        atom.write_header(&mut stream).unwrap();
        atom.write_fields(&mut stream).unwrap();
        assert_eq!(stream.size(), 28);
        assert_eq!(&stream.data()[4..8], b"uuid");
        assert_eq!(&stream.data()[8..24], uuid.as_ref());
    }

    #[test]
    fn test_esds_size() {
        let atom = Atom::esds(EsDescriptor::new(1));
        // 12-byte full header plus a 5-byte minimal descriptor
        assert_eq!(atom.size(), 17);
        assert_eq!(atom.header_size(), 12);
    }
}
