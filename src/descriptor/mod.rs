mod es;
mod od;

pub use es::*;
pub use od::*;

use crate::{AtomInspector, ByteStream, Error, Result};

/// Tag and size-encoding bookkeeping shared by every descriptor.
///
/// The on-wire header is the tag byte followed by 1 to 4 size bytes, 7
/// bits each, high bit set on all but the last. The parsed encoding
/// length is kept so a non-minimal encoding serializes back to the same
/// bytes; freshly built descriptors use the minimal length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescriptorHeader {
    pub tag: u8,
    size_length: u8,
}

impl DescriptorHeader {
    pub fn minimal(tag: u8) -> Self {
        DescriptorHeader {
            tag,
            size_length: 1,
        }
    }

    /// Header length for the given payload: the tag byte plus however many
    /// size bytes the payload needs, never fewer than were parsed.
    pub fn header_size(&self, payload_size: u32) -> u32 {
        1 + u32::from(self.size_length).max(minimal_size_length(payload_size))
    }

    pub(crate) fn write(&self, stream: &mut dyn ByteStream, payload_size: u32) -> Result<()> {
        stream.write_u8(self.tag)?;
        write_expandable_size(
            stream,
            payload_size,
            self.header_size(payload_size) - 1,
        )
    }
}

/// The minimal number of size bytes for a payload size.
pub(crate) fn minimal_size_length(size: u32) -> u32 {
    match size {
        0..=0x7f => 1,
        0x80..=0x3fff => 2,
        0x4000..=0x1f_ffff => 3,
        _ => 4,
    }
}

/// Encode `size` in exactly `length` expandable-size bytes.
pub(crate) fn write_expandable_size(
    stream: &mut dyn ByteStream,
    size: u32,
    length: u32,
) -> Result<()> {
    if size >> 28 != 0 {
        return Err(Error::InvalidFormat("descriptor payload exceeds 28 bits"));
    }

    for i in (0..length).rev() {
        let mut byte = ((size >> (7 * i)) & 0x7f) as u8;
        if i > 0 {
            byte |= 0x80;
        }
        stream.write_u8(byte)?;
    }

    Ok(())
}

/// Any of the supported descriptors, or the raw fallback.
#[derive(Debug, Clone, PartialEq)]
pub enum Descriptor {
    Es(EsDescriptor),
    EsIdInc(EsIdIncDescriptor),
    EsIdRef(EsIdRefDescriptor),
    Object(ObjectDescriptor),
    Unknown(UnknownDescriptor),
}

impl Descriptor {
    pub fn tag(&self) -> u8 {
        self.header().tag
    }

    pub fn header(&self) -> &DescriptorHeader {
        match self {
            Descriptor::Es(d) => &d.header,
            Descriptor::EsIdInc(d) => &d.header,
            Descriptor::EsIdRef(d) => &d.header,
            Descriptor::Object(d) => &d.header,
            Descriptor::Unknown(d) => &d.header,
        }
    }

    pub fn payload_size(&self) -> u32 {
        match self {
            Descriptor::Es(d) => d.payload_size(),
            Descriptor::EsIdInc(_) => 4,
            Descriptor::EsIdRef(_) => 2,
            Descriptor::Object(d) => d.payload_size(),
            Descriptor::Unknown(d) => d.payload.len() as u32,
        }
    }

    pub fn header_size(&self) -> u32 {
        self.header().header_size(self.payload_size())
    }

    /// The full on-wire size, header included.
    pub fn size(&self) -> u32 {
        self.header_size() + self.payload_size()
    }

    pub fn write(&self, stream: &mut dyn ByteStream) -> Result<()> {
        self.header().write(stream, self.payload_size())?;

        match self {
            Descriptor::Es(d) => d.write_fields(stream),
            Descriptor::EsIdInc(d) => stream.write_u32(d.track_id),
            Descriptor::EsIdRef(d) => stream.write_u16(d.ref_index),
            Descriptor::Object(d) => d.write_fields(stream),
            Descriptor::Unknown(d) => stream.write(&d.payload),
        }
    }

    pub fn inspect(&self, inspector: &mut dyn AtomInspector) -> Result<()> {
        match self {
            Descriptor::Es(d) => d.inspect(inspector),
            Descriptor::EsIdInc(d) => {
                inspector.start_descriptor(
                    "ES_ID_Inc",
                    self.header_size(),
                    self.size() as u64,
                )?;
                inspector.add_uint(Some("track_id"), d.track_id as u64, crate::FormatHint::Dec)?;
                inspector.end_descriptor()
            }
            Descriptor::EsIdRef(d) => {
                inspector.start_descriptor(
                    "ES_ID_Ref",
                    self.header_size(),
                    self.size() as u64,
                )?;
                inspector.add_uint(Some("ref_index"), d.ref_index as u64, crate::FormatHint::Dec)?;
                inspector.end_descriptor()
            }
            Descriptor::Object(d) => d.inspect(inspector),
            Descriptor::Unknown(d) => {
                inspector.start_descriptor(
                    "UnknownDescriptor",
                    self.header_size(),
                    self.size() as u64,
                )?;
                inspector.add_uint(Some("tag"), d.header.tag as u64, crate::FormatHint::Hex)?;
                inspector.add_bytes(Some("payload"), &d.payload)?;
                inspector.end_descriptor()
            }
        }
    }
}

impl From<EsDescriptor> for Descriptor {
    fn from(desc: EsDescriptor) -> Self {
        Descriptor::Es(desc)
    }
}

impl From<EsIdIncDescriptor> for Descriptor {
    fn from(desc: EsIdIncDescriptor) -> Self {
        Descriptor::EsIdInc(desc)
    }
}

impl From<EsIdRefDescriptor> for Descriptor {
    fn from(desc: EsIdRefDescriptor) -> Self {
        Descriptor::EsIdRef(desc)
    }
}

impl From<ObjectDescriptor> for Descriptor {
    fn from(desc: ObjectDescriptor) -> Self {
        Descriptor::Object(desc)
    }
}

/// A descriptor with no registered parser; the payload is kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownDescriptor {
    pub header: DescriptorHeader,
    pub payload: Vec<u8>,
}

/// Creates descriptors from a byte stream, dispatching on the tag byte.
#[derive(Debug)]
pub struct DescriptorFactory;

impl DescriptorFactory {
    /// Read one descriptor; `Ok(None)` at a clean end of stream.
    pub fn create_from_stream(stream: &mut dyn ByteStream) -> Result<Option<Descriptor>> {
        if stream.tell() >= stream.size() {
            return Ok(None);
        }

        let tag = stream.read_u8()?;

        let mut payload_size: u32 = 0;
        let mut size_length: u8 = 0;
        loop {
            let byte = stream.read_u8()?;
            size_length += 1;
            payload_size = (payload_size << 7) | (byte & 0x7f) as u32;
            if byte & 0x80 == 0 || size_length == 4 {
                break;
            }
        }

        let header = DescriptorHeader { tag, size_length };

        let descriptor = match tag {
            EsDescriptor::TAG => EsDescriptor::read(stream, header, payload_size)?.into(),
            EsIdIncDescriptor::TAG => EsIdIncDescriptor::read(stream, header, payload_size)?.into(),
            EsIdRefDescriptor::TAG => EsIdRefDescriptor::read(stream, header, payload_size)?.into(),
            OBJECT_DESCRIPTOR_TAG_OD
            | OBJECT_DESCRIPTOR_TAG_IOD
            | OBJECT_DESCRIPTOR_TAG_MP4_OD
            | OBJECT_DESCRIPTOR_TAG_MP4_IOD => {
                ObjectDescriptor::read(stream, header, payload_size)?.into()
            }
            _ => {
                // check the size before trusting it with an allocation
                if payload_size as u64 > stream.size() - stream.tell() {
                    return Err(Error::NotEnoughData);
                }
                let mut payload = vec![0u8; payload_size as usize];
                stream.read(&mut payload)?;
                Descriptor::Unknown(UnknownDescriptor { header, payload })
            }
        };

        Ok(Some(descriptor))
    }

    /// Read sub-descriptors until `remaining` payload bytes are consumed.
    pub(crate) fn read_sub_descriptors(
        stream: &mut dyn ByteStream,
        mut remaining: u32,
    ) -> Result<Vec<Descriptor>> {
        let mut descriptors = Vec::new();

        while remaining > 0 {
            let before = stream.tell();
            let descriptor = match Self::create_from_stream(stream)? {
                Some(descriptor) => descriptor,
                None => {
                    tracing::warn!(remaining, "descriptor list ended early");
                    break;
                }
            };

            let consumed = stream.tell() - before;
            if consumed > remaining as u64 {
                return Err(Error::InvalidFormat("descriptor overruns its container"));
            }
            remaining -= consumed as u32;

            descriptors.push(descriptor);
        }

        Ok(descriptors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryStream;

    fn encode(size: u32) -> Vec<u8> {
        let mut stream = MemoryStream::new();
        write_expandable_size(&mut stream, size, minimal_size_length(size)).unwrap();
        stream.into_inner()
    }

    #[test]
    fn test_expandable_size_minimal() {
        assert_eq!(encode(0x00), vec![0x00]);
        assert_eq!(encode(0x7f), vec![0x7f]);
        assert_eq!(encode(0x80), vec![0x81, 0x00]);
        assert_eq!(encode(0x3fff), vec![0xff, 0x7f]);
        assert_eq!(encode(0x4000), vec![0x81, 0x80, 0x00]);
        assert_eq!(encode(0x0fff_ffff), vec![0xff, 0xff, 0xff, 0x7f]);
    }

    #[test]
    fn test_expandable_size_round_trip() {
        for size in [0u32, 1, 0x7f, 0x80, 0x3fff, 0x4000, 0x1f_ffff, 0x20_0000, 0x0fff_ffff] {
            let mut stream = MemoryStream::new();
            stream.write_u8(0x55).unwrap(); // arbitrary tag
            write_expandable_size(&mut stream, size, minimal_size_length(size)).unwrap();
            for _ in 0..size.min(16) {
                stream.write_u8(0).unwrap();
            }

            stream.seek(1).unwrap();
            let mut decoded: u32 = 0;
            loop {
                let byte = stream.read_u8().unwrap();
                decoded = (decoded << 7) | (byte & 0x7f) as u32;
                if byte & 0x80 == 0 {
                    break;
                }
            }
            assert_eq!(decoded, size);
        }
    }

    #[test]
    fn test_unknown_descriptor_round_trip() {
        let bytes = vec![0x40u8, 0x03, 0xaa, 0xbb, 0xcc];
        let mut stream = MemoryStream::from_vec(bytes.clone());
        let descriptor = DescriptorFactory::create_from_stream(&mut stream)
            .unwrap()
            .unwrap();

        assert_eq!(descriptor.tag(), 0x40);
        assert_eq!(descriptor.header_size(), 2);
        assert_eq!(descriptor.size(), 5);

        let mut out = MemoryStream::new();
        descriptor.write(&mut out).unwrap();
        assert_eq!(out.into_inner(), bytes);
    }

    #[test]
    fn test_non_minimal_size_round_trip() {
        // a 2-byte encoding of a size that fits in one byte
        let bytes = vec![0x40u8, 0x80, 0x02, 0xaa, 0xbb];
        let mut stream = MemoryStream::from_vec(bytes.clone());
        let descriptor = DescriptorFactory::create_from_stream(&mut stream)
            .unwrap()
            .unwrap();

        assert_eq!(descriptor.header_size(), 3);

        let mut out = MemoryStream::new();
        descriptor.write(&mut out).unwrap();
        assert_eq!(out.into_inner(), bytes);
    }
}
