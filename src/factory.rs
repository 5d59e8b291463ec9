use crate::{
    share, Atom, AtomHeader, AtomId, Descriptor, DescriptorFactory, Error, FourCC,
    Payload, Result, SharedStream, SubStream, Tree, Uuid, ATOM_TYPE_ESDS, ATOM_TYPE_IODS,
    ATOM_TYPE_UUID,
};

// Kinds whose payload is a plain sequence of child atoms.
const CONTAINER_KINDS: &[FourCC] = &[
    FourCC::new(b"moov"),
    FourCC::new(b"trak"),
    FourCC::new(b"mdia"),
    FourCC::new(b"minf"),
    FourCC::new(b"stbl"),
    FourCC::new(b"dinf"),
    FourCC::new(b"edts"),
    FourCC::new(b"udta"),
    FourCC::new(b"mvex"),
    FourCC::new(b"moof"),
    FourCC::new(b"traf"),
    FourCC::new(b"mfra"),
    FourCC::new(b"hnti"),
    FourCC::new(b"hinf"),
    FourCC::new(b"sinf"),
    FourCC::new(b"schi"),
    FourCC::new(b"wave"),
    FourCC::new(b"tref"),
];

// Full-atom containers: version and flags precede the children.
const FULL_CONTAINER_KINDS: &[FourCC] = &[FourCC::new(b"meta")];

// Full atoms whose fields the factory leaves opaque: the version and
// flags are decoded, the rest of the payload is kept verbatim.
const FULL_ATOM_KINDS: &[FourCC] = &[
    FourCC::new(b"mvhd"),
    FourCC::new(b"tkhd"),
    FourCC::new(b"mdhd"),
    FourCC::new(b"hdlr"),
    FourCC::new(b"vmhd"),
    FourCC::new(b"smhd"),
    FourCC::new(b"nmhd"),
    FourCC::new(b"mehd"),
    FourCC::new(b"mfhd"),
    FourCC::new(b"tfhd"),
    FourCC::new(b"tfdt"),
];

const ATOM_TYPE_NAME: FourCC = FourCC::new(b"name");
const ATOM_TYPE_UDTA: FourCC = FourCC::new(b"udta");
const ATOM_TYPE_HNTI: FourCC = FourCC::new(b"hnti");

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Dispatch {
    Container,
    FullContainer,
    FullAtom,
    Esds,
    Iods,
    NullString,
    Unknown,
}

/// Creates atoms from a byte stream, dispatching on the four-character
/// code and recursing into containers.
///
/// The factory keeps a stack of enclosing container kinds; a few codes
/// mean different things in different parent contexts (a `name` atom
/// inside `udta` or `hnti` is a null-terminated string, anywhere else it
/// is opaque).
///
/// By default a malformed child inside a container is dropped with a
/// warning and the container keeps the children that parsed; a strict
/// factory fails the whole container instead.
#[derive(Debug, Default)]
pub struct AtomFactory {
    strict: bool,
    context: Vec<FourCC>,
}

impl AtomFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// A factory that fails a container on the first malformed child.
    pub fn strict() -> Self {
        AtomFactory {
            strict: true,
            context: Vec::new(),
        }
    }

    fn context(&self) -> Option<FourCC> {
        self.context.last().copied()
    }

    fn dispatch(&self, kind: FourCC, has_uuid: bool) -> Dispatch {
        if has_uuid {
            return Dispatch::Unknown;
        }
        if CONTAINER_KINDS.contains(&kind) {
            return Dispatch::Container;
        }
        if FULL_CONTAINER_KINDS.contains(&kind) {
            return Dispatch::FullContainer;
        }
        if FULL_ATOM_KINDS.contains(&kind) {
            return Dispatch::FullAtom;
        }
        if kind == ATOM_TYPE_ESDS {
            return Dispatch::Esds;
        }
        if kind == ATOM_TYPE_IODS {
            return Dispatch::Iods;
        }
        if kind == ATOM_TYPE_NAME
            && matches!(self.context(), Some(ATOM_TYPE_UDTA) | Some(ATOM_TYPE_HNTI))
        {
            return Dispatch::NullString;
        }

        Dispatch::Unknown
    }

    /// Read the next atom from the stream into the tree, returning its
    /// handle; `Ok(None)` at a clean end of stream.
    pub fn create_from_stream(
        &mut self,
        tree: &mut Tree,
        stream: &SharedStream,
    ) -> Result<Option<AtomId>> {
        let (start, stream_size) = {
            let source = stream.borrow();
            (source.tell(), source.size())
        };

        if start >= stream_size {
            return Ok(None);
        }
        let available = stream_size - start;
        if available < 8 {
            tracing::warn!(remaining = available, "trailing bytes too short for an atom header");
            return Ok(None);
        }

        let mut header_len: u64 = 8;
        let (size32, kind, size64, uuid) = {
            let mut source = stream.borrow_mut();
            let size32 = source.read_u32()?;
            let kind = FourCC::from(source.read_u32()?);

            let size64 = if size32 == 1 {
                if available < header_len + 8 {
                    return Err(Error::NotEnoughData);
                }
                header_len += 8;
                Some(source.read_u64()?)
            } else {
                None
            };

            let uuid = if kind == ATOM_TYPE_UUID {
                if available < header_len + 16 {
                    return Err(Error::NotEnoughData);
                }
                header_len += 16;
                let mut bytes = [0u8; 16];
                source.read(&mut bytes)?;
                Some(Uuid::from(bytes))
            } else {
                None
            };

            (size32, kind, size64, uuid)
        };

        let long = size64.is_some();
        let declared = match (size32, size64) {
            (0, _) => available,
            (1, Some(size)) => size,
            _ => size32 as u64,
        };

        if declared < header_len {
            return Err(Error::InvalidFormat("atom size smaller than its header"));
        }
        let end = start + declared;

        let dispatch = self.dispatch(kind, uuid.is_some());

        // registered kinds must fit the enclosing bound; unknown payloads
        // get clamped instead so truncated files still inspect
        if end > stream_size && !matches!(dispatch, Dispatch::Unknown | Dispatch::FullAtom) {
            return Err(Error::InvalidFormat("atom extends past its container"));
        }

        match dispatch {
            Dispatch::Container | Dispatch::FullContainer => {
                let mut header = if dispatch == Dispatch::FullContainer {
                    if declared < header_len + 4 {
                        return Err(Error::InvalidFormat("atom size smaller than its header"));
                    }
                    let word = stream.borrow_mut().read_u32()?;
                    header_len += 4;
                    AtomHeader::full(kind, (word >> 24) as u8, word & 0x00ff_ffff)
                } else {
                    AtomHeader::new(kind)
                };
                header.set_size(declared, long);

                let id = tree.insert(Atom {
                    header,
                    uuid: None,
                    payload: Payload::Container(Vec::new()),
                });

                self.context.push(kind);
                let result = self.read_children(tree, stream, id, start + header_len, end);
                self.context.pop();

                if let Err(err) = result {
                    let _ = tree.free(id);
                    return Err(err);
                }

                stream.borrow_mut().seek(end)?;

                Ok(Some(id))
            }

            Dispatch::FullAtom => {
                if declared < header_len + 4 {
                    return Err(Error::InvalidFormat("atom size smaller than its header"));
                }
                let word = stream.borrow_mut().read_u32()?;
                let mut header = AtomHeader::full(kind, (word >> 24) as u8, word & 0x00ff_ffff);
                header.set_size(declared, long);

                let atom = Atom::unknown_from_stream(header, None, stream)?;
                let end = start + atom.size();
                stream.borrow_mut().seek(end)?;

                Ok(Some(tree.insert(atom)))
            }

            Dispatch::Esds => {
                if declared < header_len + 4 {
                    return Err(Error::InvalidFormat("atom size smaller than its header"));
                }
                let word = stream.borrow_mut().read_u32()?;
                let mut header = AtomHeader::full(kind, (word >> 24) as u8, word & 0x00ff_ffff);
                header.set_size(declared, long);

                let payload_start = start + header_len + 4;
                let mut sub = SubStream::new(stream.clone(), payload_start, end - payload_start);
                let descriptor = DescriptorFactory::create_from_stream(&mut sub)?
                    .ok_or(Error::InvalidFormat("esds atom without a descriptor"))?;
                let descriptor = match descriptor {
                    Descriptor::Es(descriptor) => descriptor,
                    _ => return Err(Error::InvalidFormat("expected an ES descriptor")),
                };

                stream.borrow_mut().seek(end)?;

                let id = tree.insert(Atom {
                    header,
                    uuid: None,
                    payload: Payload::Esds(descriptor),
                });
                // anything after the descriptor is dropped, size follows
                tree.refresh_size(id);

                Ok(Some(id))
            }

            Dispatch::Iods => {
                if declared < header_len + 4 {
                    return Err(Error::InvalidFormat("atom size smaller than its header"));
                }
                let word = stream.borrow_mut().read_u32()?;
                let mut header = AtomHeader::full(kind, (word >> 24) as u8, word & 0x00ff_ffff);
                header.set_size(declared, long);

                let payload_start = start + header_len + 4;
                let mut sub = SubStream::new(stream.clone(), payload_start, end - payload_start);
                let descriptor = DescriptorFactory::create_from_stream(&mut sub)?
                    .ok_or(Error::InvalidFormat("iods atom without a descriptor"))?;

                stream.borrow_mut().seek(end)?;

                let id = tree.insert(Atom {
                    header,
                    uuid: None,
                    payload: Payload::Iods(descriptor),
                });
                // anything after the descriptor is dropped, size follows
                tree.refresh_size(id);

                Ok(Some(id))
            }

            Dispatch::NullString => {
                let mut header = AtomHeader::new(kind);
                header.set_size(declared, long);

                let mut bytes = vec![0u8; (end - start - header_len) as usize];
                stream.borrow_mut().read(&mut bytes)?;

                // force null-termination, keep up to the first terminator
                if let Some(last) = bytes.last_mut() {
                    *last = 0;
                }
                let terminator = bytes.iter().position(|&b| b == 0).unwrap_or(0);
                let value = String::from_utf8_lossy(&bytes[..terminator]).into_owned();

                Ok(Some(tree.insert(Atom {
                    header,
                    uuid: None,
                    payload: Payload::NullString(value),
                })))
            }

            Dispatch::Unknown => {
                let mut header = AtomHeader::new(kind);
                header.set_size(declared, long);

                let atom = Atom::unknown_from_stream(header, uuid, stream)?;
                let end = start + atom.size();
                stream.borrow_mut().seek(end)?;

                Ok(Some(tree.insert(atom)))
            }
        }
    }

    /// Read every remaining top-level atom from the stream.
    pub fn create_atoms_from_stream(
        &mut self,
        tree: &mut Tree,
        stream: &SharedStream,
    ) -> Result<Vec<AtomId>> {
        let mut atoms = Vec::new();
        while let Some(atom) = self.create_from_stream(tree, stream)? {
            atoms.push(atom);
        }

        Ok(atoms)
    }

    // Parse children out of the payload region `[offset, end)`, appending
    // to `parent` as they decode.
    fn read_children(
        &mut self,
        tree: &mut Tree,
        stream: &SharedStream,
        parent: AtomId,
        offset: u64,
        end: u64,
    ) -> Result<()> {
        let sub = share(SubStream::new(stream.clone(), offset, end - offset));

        loop {
            match self.create_from_stream(tree, &sub) {
                Ok(Some(child)) => tree.add_child(parent, child, None)?,
                Ok(None) => break,
                Err(err) if !self.strict => {
                    tracing::warn!(
                        parent = %tree.get(parent).kind(),
                        error = %err,
                        "dropping malformed child atom"
                    );
                    break;
                }
                Err(err) => return Err(err),
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{MemoryStream, UnknownPayload};

    fn parse_one(data: Vec<u8>) -> (Tree, AtomId) {
        let mut tree = Tree::new();
        let stream = share(MemoryStream::from_vec(data));
        let id = AtomFactory::new()
            .create_from_stream(&mut tree, &stream)
            .unwrap()
            .expect("an atom");
        (tree, id)
    }

    fn round_trip(data: Vec<u8>) -> Vec<u8> {
        let (tree, id) = parse_one(data);
        let mut out = MemoryStream::new();
        tree.write(id, &mut out).unwrap();
        out.into_inner()
    }

    #[test]
    fn test_short_header() {
        let data = b"\x00\x00\x00\x10free\x00\x00\x00\x00\x00\x00\x00\x00".to_vec();
        let (tree, id) = parse_one(data.clone());

        let atom = tree.get(id);
        assert_eq!(atom.kind(), FourCC::new(b"free"));
        assert_eq!(atom.size(), 16);
        assert_eq!(atom.header_size(), 8);
        match &atom.payload {
            Payload::Unknown(UnknownPayload::Buffered(payload)) => {
                assert_eq!(payload.as_slice(), &[0u8; 8]);
            }
            other => panic!("expected a buffered unknown atom: {:?}", other),
        }

        assert_eq!(round_trip(data.clone()), data);
    }

    #[test]
    fn test_long_header() {
        let mut data = b"\x00\x00\x00\x01mdat\x00\x00\x00\x00\x00\x00\x01\x00".to_vec();
        data.extend_from_slice(&[0xab; 240]);
        let (tree, id) = parse_one(data.clone());

        let atom = tree.get(id);
        assert_eq!(atom.kind(), FourCC::new(b"mdat"));
        assert_eq!(atom.size(), 256);
        assert_eq!(atom.header_size(), 16);
        assert!(matches!(
            atom.payload,
            Payload::Unknown(UnknownPayload::Deferred { .. })
        ));

        assert_eq!(round_trip(data.clone()), data);
    }

    #[test]
    fn test_full_atom() {
        let data = b"\x00\x00\x00\x10mvhd\x01\x00\x00\x02\xaa\xbb\xcc\xdd".to_vec();
        let (tree, id) = parse_one(data.clone());

        let atom = tree.get(id);
        assert_eq!(atom.kind(), FourCC::new(b"mvhd"));
        assert_eq!(atom.header.version, 1);
        assert_eq!(atom.header.flags, 0x000002);
        assert_eq!(atom.header_size(), 12);
        assert_eq!(atom.size(), 16);

        assert_eq!(round_trip(data.clone()), data);
    }

    #[test]
    fn test_size_zero_extends_to_end() {
        let data = b"\x00\x00\x00\x00free\x01\x02\x03\x04".to_vec();
        let (tree, id) = parse_one(data);

        let atom = tree.get(id);
        assert_eq!(atom.size(), 12);
        assert_eq!(atom.payload_size(), 4);
    }

    #[test]
    fn test_uuid_atom() {
        let uuid = Uuid::parse_hex("6d1d9b0542d544e680e2141daff757b2").unwrap();
        let mut data = b"\x00\x00\x00\x1cuuid".to_vec();
        data.extend_from_slice(uuid.as_ref());
        data.extend_from_slice(&[1, 2, 3, 4]);
        let (tree, id) = parse_one(data.clone());

        let atom = tree.get(id);
        assert_eq!(atom.uuid, Some(uuid));
        assert_eq!(atom.header_size(), 24);
        assert_eq!(atom.size(), 28);

        assert_eq!(round_trip(data.clone()), data);
    }

    #[test]
    fn test_container_recursion() {
        // moov { mvhd, trak { tkhd }, trak { } }
        let mut data = Vec::new();
        data.extend_from_slice(b"\x00\x00\x00\x34moov");
        data.extend_from_slice(b"\x00\x00\x00\x10mvhd\x00\x00\x00\x00\x00\x00\x03\xe8");
        data.extend_from_slice(b"\x00\x00\x00\x14trak");
        data.extend_from_slice(b"\x00\x00\x00\x0ctkhd\x00\x00\x00\x07");
        data.extend_from_slice(b"\x00\x00\x00\x08trak");

        let (tree, id) = parse_one(data.clone());
        let moov = tree.get(id);
        assert!(moov.is_container());
        assert_eq!(moov.size(), 0x34);
        assert_eq!(tree.children(id).len(), 3);

        let trak1 = tree.find_child(id, "trak[1]").unwrap();
        assert!(tree.children(trak1).is_empty());
        assert_eq!(tree.find_child(id, "trak[2]"), None);

        let tkhd = tree.find_child(id, "trak/tkhd").unwrap();
        assert_eq!(tree.get(tkhd).header.flags, 7);
        assert_eq!(tree.parent(tkhd), tree.find_child(id, "trak"));

        assert_eq!(round_trip(data.clone()), data);
    }

    #[test]
    fn test_esds_atom() {
        // a 12-byte full header and a minimal 5-byte ES descriptor
        let data = b"\x00\x00\x00\x11esds\x00\x00\x00\x00\x03\x03\x00\x2a\x00".to_vec();
        let (tree, id) = parse_one(data.clone());

        match &tree.get(id).payload {
            Payload::Esds(descriptor) => assert_eq!(descriptor.es_id, 42),
            other => panic!("expected an esds payload: {:?}", other),
        }

        assert_eq!(round_trip(data.clone()), data);
    }

    #[test]
    fn test_esds_wide_size_round_trips() {
        // the common 4-byte expandable-size encoding must be preserved
        let data =
            b"\x00\x00\x00\x14esds\x00\x00\x00\x00\x03\x80\x80\x80\x03\x00\x2a\x00".to_vec();
        assert_eq!(round_trip(data.clone()), data);
    }

    #[test]
    fn test_iods_atom() {
        // an MP4_OD object descriptor holding one ES_ID_Inc reference
        let data = b"\x00\x00\x00\x16iods\x00\x00\x00\x00\x11\x08\x00\x4f\x0e\x04\x00\x00\x00\x01"
            .to_vec();
        let (tree, id) = parse_one(data.clone());

        match &tree.get(id).payload {
            Payload::Iods(Descriptor::Object(od)) => {
                assert_eq!(od.od_id(), 1);
                assert_eq!(od.sub_descriptors.len(), 1);
            }
            other => panic!("expected an iods payload: {:?}", other),
        }

        assert_eq!(round_trip(data.clone()), data);
    }

    #[test]
    fn test_name_is_context_sensitive() {
        // a name atom inside udta parses as a string
        let mut data = Vec::new();
        data.extend_from_slice(b"\x00\x00\x00\x16udta");
        data.extend_from_slice(b"\x00\x00\x00\x0ename");
        data.extend_from_slice(b"hello\x00");
        let (tree, id) = parse_one(data.clone());

        let name = tree.find_child(id, "name").unwrap();
        match &tree.get(name).payload {
            Payload::NullString(value) => assert_eq!(value, "hello"),
            other => panic!("expected a string payload: {:?}", other),
        }
        assert_eq!(round_trip(data.clone()), data);

        // the same atom at the top level stays opaque
        let mut top = Vec::new();
        top.extend_from_slice(b"\x00\x00\x00\x0ename");
        top.extend_from_slice(b"hello\x00");
        let (tree, id) = parse_one(top);
        assert!(matches!(tree.get(id).payload, Payload::Unknown(_)));
    }

    #[test]
    fn test_lenient_keeps_good_children() {
        // the second child declares a 4-byte size, which is malformed
        let mut data = Vec::new();
        data.extend_from_slice(b"\x00\x00\x00\x1cmoov");
        data.extend_from_slice(b"\x00\x00\x00\x0cfree\x00\x00\x00\x00");
        data.extend_from_slice(b"\x00\x00\x00\x04bad!");

        let mut tree = Tree::new();
        let stream = share(MemoryStream::from_vec(data.clone()));
        let id = AtomFactory::new()
            .create_from_stream(&mut tree, &stream)
            .unwrap()
            .unwrap();
        assert_eq!(tree.children(id).len(), 1);
        // the container size shrinks to what it still holds
        assert_eq!(tree.get(id).size(), 8 + 12);

        let stream = share(MemoryStream::from_vec(data));
        let mut tree = Tree::new();
        assert!(AtomFactory::strict()
            .create_from_stream(&mut tree, &stream)
            .is_err());
    }

    #[test]
    fn test_truncated_unknown_is_clamped() {
        // declares 0x20 bytes but the stream ends after 4 payload bytes
        let data = b"\x00\x00\x00\x20zzzz\x01\x02\x03\x04".to_vec();
        let (tree, id) = parse_one(data);

        assert_eq!(tree.get(id).size(), 12);
    }

    #[test]
    fn test_header_smaller_than_declared_size() {
        let data = b"\x00\x00\x00\x04free".to_vec();
        let mut tree = Tree::new();
        let stream = share(MemoryStream::from_vec(data));
        assert!(AtomFactory::new()
            .create_from_stream(&mut tree, &stream)
            .is_err());
    }

    #[test]
    fn test_multiple_top_level_atoms() {
        let mut data = Vec::new();
        data.extend_from_slice(b"\x00\x00\x00\x10ftyp\x69\x73\x6f\x6d\x00\x00\x00\x01");
        data.extend_from_slice(b"\x00\x00\x00\x08moov");

        let mut tree = Tree::new();
        let stream = share(MemoryStream::from_vec(data));
        let atoms = AtomFactory::new()
            .create_atoms_from_stream(&mut tree, &stream)
            .unwrap();

        assert_eq!(atoms.len(), 2);
        assert_eq!(tree.get(atoms[0]).kind(), FourCC::new(b"ftyp"));
        assert_eq!(tree.get(atoms[1]).kind(), FourCC::new(b"moov"));
    }
}
