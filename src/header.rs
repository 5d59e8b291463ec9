use crate::{ByteStream, FourCC, Result, Uuid};

pub const ATOM_HEADER_SIZE: u32 = 8;
pub const FULL_ATOM_HEADER_SIZE: u32 = 12;

/// The common header carried by every atom: four-character code, 32- or
/// 64-bit size encoding, and the version/flags pair of "full" atoms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AtomHeader {
    pub kind: FourCC,
    size32: u32,
    size64: u64,
    full: bool,
    pub version: u8,
    pub flags: u32,
}

impl AtomHeader {
    /// A plain header covering only itself.
    pub fn new(kind: FourCC) -> Self {
        AtomHeader {
            kind,
            size32: ATOM_HEADER_SIZE,
            size64: 0,
            full: false,
            version: 0,
            flags: 0,
        }
    }

    /// A full-atom header with a version byte and 24-bit flags.
    pub fn full(kind: FourCC, version: u8, flags: u32) -> Self {
        AtomHeader {
            kind,
            size32: FULL_ATOM_HEADER_SIZE,
            size64: 0,
            full: true,
            version,
            flags,
        }
    }

    pub fn is_full(&self) -> bool {
        self.full
    }

    /// Whether the size is encoded in the extended 64-bit form.
    pub fn is_long(&self) -> bool {
        self.size32 == 1
    }

    /// The full on-wire size, including the header itself.
    pub fn size(&self) -> u64 {
        if self.size32 == 1 {
            self.size64
        } else {
            self.size32 as u64
        }
    }

    /// Set the on-wire size, choosing the minimal encoding unless 64-bit
    /// is forced. A header already long-encoded stays long even for small
    /// values so a parsed atom re-serializes to the same bytes.
    pub fn set_size(&mut self, size: u64, mut force64: bool) {
        if !force64 && self.size32 == 1 && self.size64 <= u32::MAX as u64 {
            force64 = true;
        }

        if size >> 32 == 0 && !force64 {
            self.size32 = size as u32;
            self.size64 = 0;
        } else {
            self.size32 = 1;
            self.size64 = size;
        }
    }

    /// The header length: 8 or 12 plus 8 for the 64-bit size form. The
    /// 16-byte `uuid` extension is accounted for by the atom carrying it.
    pub fn header_size(&self) -> u32 {
        let base = if self.full {
            FULL_ATOM_HEADER_SIZE
        } else {
            ATOM_HEADER_SIZE
        };

        base + if self.size32 == 1 { 8 } else { 0 }
    }

    /// Emit the header: size32, kind, the optional 64-bit size, the
    /// optional extended type, and the version/flags of full atoms.
    pub fn write(&self, stream: &mut dyn ByteStream, uuid: Option<&Uuid>) -> Result<()> {
        stream.write_u32(self.size32)?;
        stream.write_u32(self.kind.into())?;

        if self.size32 == 1 {
            stream.write_u64(self.size64)?;
        }

        if let Some(uuid) = uuid {
            stream.write(uuid.as_ref())?;
        }

        if self.full {
            stream.write_u8(self.version)?;
            stream.write_u24(self.flags)?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryStream;

    #[test]
    fn test_set_size_minimal() {
        let mut header = AtomHeader::new(FourCC::new(b"free"));
        header.set_size(16, false);
        assert_eq!(header.size(), 16);
        assert!(!header.is_long());
        assert_eq!(header.header_size(), 8);
    }

    #[test]
    fn test_set_size_forced_is_sticky() {
        let mut header = AtomHeader::new(FourCC::new(b"mdat"));
        header.set_size(256, true);
        assert!(header.is_long());
        assert_eq!(header.header_size(), 16);

        // once long, stays long even for a small value
        header.set_size(64, false);
        assert!(header.is_long());
        assert_eq!(header.size(), 64);
    }

    #[test]
    fn test_set_size_large() {
        let mut header = AtomHeader::new(FourCC::new(b"mdat"));
        header.set_size(1 << 33, false);
        assert!(header.is_long());
        assert_eq!(header.size(), 1 << 33);
    }

    #[test]
    fn test_write_plain() {
        let mut header = AtomHeader::new(FourCC::new(b"free"));
        header.set_size(16, false);

        let mut stream = MemoryStream::new();
        header.write(&mut stream, None).unwrap();
        assert_eq!(stream.data(), b"\x00\x00\x00\x10free");
    }

    #[test]
    fn test_write_full() {
        let mut header = AtomHeader::full(FourCC::new(b"mvhd"), 1, 0x000002);
        header.set_size(0x10, false);

        let mut stream = MemoryStream::new();
        header.write(&mut stream, None).unwrap();
        assert_eq!(stream.data(), b"\x00\x00\x00\x10mvhd\x01\x00\x00\x02");
    }

    #[test]
    fn test_write_long() {
        let mut header = AtomHeader::new(FourCC::new(b"mdat"));
        header.set_size(256, true);

        let mut stream = MemoryStream::new();
        header.write(&mut stream, None).unwrap();
        assert_eq!(
            stream.data(),
            b"\x00\x00\x00\x01mdat\x00\x00\x00\x00\x00\x00\x01\x00"
        );
    }
}
