use crate::{
    AtomInspector, ByteStream, Descriptor, DescriptorFactory, DescriptorHeader, Error, FormatHint,
    Result,
};

pub const ES_DESCRIPTOR_FLAG_STREAM_DEPENDENCY: u8 = 0x01;
pub const ES_DESCRIPTOR_FLAG_URL: u8 = 0x02;
pub const ES_DESCRIPTOR_FLAG_OCR_STREAM: u8 = 0x04;

/// The elementary-stream descriptor (tag 0x03) carried by `esds` atoms.
///
/// The three optional fields each correspond to one of the flag bits; the
/// flags byte on the wire is derived from which options are present.
#[derive(Debug, Clone, PartialEq)]
pub struct EsDescriptor {
    pub(crate) header: DescriptorHeader,
    pub es_id: u16,
    pub stream_priority: u8,
    pub depends_on: Option<u16>,
    pub url: Option<String>,
    pub ocr_es_id: Option<u16>,
    pub sub_descriptors: Vec<Descriptor>,
}

impl EsDescriptor {
    pub const TAG: u8 = 0x03;

    pub fn new(es_id: u16) -> Self {
        EsDescriptor {
            header: DescriptorHeader::minimal(Self::TAG),
            es_id,
            stream_priority: 0,
            depends_on: None,
            url: None,
            ocr_es_id: None,
            sub_descriptors: Vec::new(),
        }
    }

    pub fn add_sub_descriptor(&mut self, descriptor: Descriptor) {
        self.sub_descriptors.push(descriptor);
    }

    fn flags(&self) -> u8 {
        let mut flags = 0;
        if self.depends_on.is_some() {
            flags |= ES_DESCRIPTOR_FLAG_STREAM_DEPENDENCY;
        }
        if self.url.is_some() {
            flags |= ES_DESCRIPTOR_FLAG_URL;
        }
        if self.ocr_es_id.is_some() {
            flags |= ES_DESCRIPTOR_FLAG_OCR_STREAM;
        }
        flags
    }

    pub fn payload_size(&self) -> u32 {
        let mut size = 3;
        if self.depends_on.is_some() {
            size += 2;
        }
        if let Some(url) = &self.url {
            size += 1 + url.len() as u32;
        }
        if self.ocr_es_id.is_some() {
            size += 2;
        }
        for sub in &self.sub_descriptors {
            size += sub.size();
        }
        size
    }

    /// The full on-wire size, header included.
    pub fn size(&self) -> u32 {
        let payload_size = self.payload_size();
        self.header.header_size(payload_size) + payload_size
    }

    pub(crate) fn write(&self, stream: &mut dyn ByteStream) -> Result<()> {
        self.header.write(stream, self.payload_size())?;
        self.write_fields(stream)
    }

    pub(crate) fn read(
        stream: &mut dyn ByteStream,
        header: DescriptorHeader,
        payload_size: u32,
    ) -> Result<Self> {
        if payload_size < 3 {
            return Err(Error::NotEnoughData);
        }

        let es_id = stream.read_u16()?;
        let bits = stream.read_u8()?;
        let mut remaining = payload_size - 3;

        let flags = (bits >> 5) & 0x7;
        let stream_priority = bits & 0x1f;

        let depends_on = if flags & ES_DESCRIPTOR_FLAG_STREAM_DEPENDENCY != 0 {
            if remaining < 2 {
                return Err(Error::NotEnoughData);
            }
            remaining -= 2;
            Some(stream.read_u16()?)
        } else {
            None
        };

        let url = if flags & ES_DESCRIPTOR_FLAG_URL != 0 {
            if remaining < 1 {
                return Err(Error::NotEnoughData);
            }
            let length = stream.read_u8()? as u32;
            remaining -= 1;

            if remaining < length {
                return Err(Error::NotEnoughData);
            }
            let mut bytes = vec![0u8; length as usize];
            stream.read(&mut bytes)?;
            remaining -= length;

            Some(String::from_utf8_lossy(&bytes).into_owned())
        } else {
            None
        };

        let ocr_es_id = if flags & ES_DESCRIPTOR_FLAG_OCR_STREAM != 0 {
            if remaining < 2 {
                return Err(Error::NotEnoughData);
            }
            remaining -= 2;
            Some(stream.read_u16()?)
        } else {
            None
        };

        let sub_descriptors = DescriptorFactory::read_sub_descriptors(stream, remaining)?;

        Ok(EsDescriptor {
            header,
            es_id,
            stream_priority,
            depends_on,
            url,
            ocr_es_id,
            sub_descriptors,
        })
    }

    pub(crate) fn write_fields(&self, stream: &mut dyn ByteStream) -> Result<()> {
        stream.write_u16(self.es_id)?;

        let bits = self.stream_priority | (self.flags() << 5);
        stream.write_u8(bits)?;

        if let Some(depends_on) = self.depends_on {
            stream.write_u16(depends_on)?;
        }

        if let Some(url) = &self.url {
            stream.write_u8(url.len() as u8)?;
            stream.write_str(url)?;
        }

        if let Some(ocr_es_id) = self.ocr_es_id {
            stream.write_u16(ocr_es_id)?;
        }

        for sub in &self.sub_descriptors {
            sub.write(stream)?;
        }

        Ok(())
    }

    pub(crate) fn inspect(&self, inspector: &mut dyn AtomInspector) -> Result<()> {
        let payload_size = self.payload_size();
        inspector.start_descriptor(
            "ESDescriptor",
            self.header.header_size(payload_size),
            (self.header.header_size(payload_size) + payload_size) as u64,
        )?;
        inspector.add_uint(Some("es_id"), self.es_id as u64, FormatHint::Dec)?;
        inspector.add_uint(
            Some("stream_priority"),
            self.stream_priority as u64,
            FormatHint::Dec,
        )?;

        for sub in &self.sub_descriptors {
            sub.inspect(inspector)?;
        }

        inspector.end_descriptor()
    }
}

/// The ES-ID-Inc descriptor (tag 0x0E): a track reference inside `iods`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EsIdIncDescriptor {
    pub(crate) header: DescriptorHeader,
    pub track_id: u32,
}

impl EsIdIncDescriptor {
    pub const TAG: u8 = 0x0e;

    pub fn new(track_id: u32) -> Self {
        EsIdIncDescriptor {
            header: DescriptorHeader::minimal(Self::TAG),
            track_id,
        }
    }

    pub(crate) fn read(
        stream: &mut dyn ByteStream,
        header: DescriptorHeader,
        payload_size: u32,
    ) -> Result<Self> {
        if payload_size < 4 {
            return Err(Error::NotEnoughData);
        }

        let track_id = stream.read_u32()?;

        if payload_size > 4 {
            tracing::warn!(extra = payload_size - 4, "oversized ES_ID_Inc descriptor");
            stream.seek(stream.tell() + (payload_size - 4) as u64)?;
        }

        Ok(EsIdIncDescriptor { header, track_id })
    }
}

/// The ES-ID-Ref descriptor (tag 0x0F): a sample-description reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EsIdRefDescriptor {
    pub(crate) header: DescriptorHeader,
    pub ref_index: u16,
}

impl EsIdRefDescriptor {
    pub const TAG: u8 = 0x0f;

    pub fn new(ref_index: u16) -> Self {
        EsIdRefDescriptor {
            header: DescriptorHeader::minimal(Self::TAG),
            ref_index,
        }
    }

    pub(crate) fn read(
        stream: &mut dyn ByteStream,
        header: DescriptorHeader,
        payload_size: u32,
    ) -> Result<Self> {
        if payload_size < 2 {
            return Err(Error::NotEnoughData);
        }

        let ref_index = stream.read_u16()?;

        if payload_size > 2 {
            tracing::warn!(extra = payload_size - 2, "oversized ES_ID_Ref descriptor");
            stream.seek(stream.tell() + (payload_size - 2) as u64)?;
        }

        Ok(EsIdRefDescriptor { header, ref_index })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryStream;

    fn round_trip(descriptor: &Descriptor) -> Descriptor {
        let mut stream = MemoryStream::new();
        descriptor.write(&mut stream).unwrap();
        assert_eq!(stream.size(), descriptor.size() as u64);

        stream.seek(0).unwrap();
        DescriptorFactory::create_from_stream(&mut stream)
            .unwrap()
            .unwrap()
    }

    #[test]
    fn test_es_minimal() {
        let descriptor = Descriptor::from(EsDescriptor::new(1));
        assert_eq!(descriptor.payload_size(), 3);
        assert_eq!(descriptor.size(), 5);

        let decoded = round_trip(&descriptor);
        assert_eq!(decoded, descriptor);
    }

    #[test]
    fn test_es_optional_fields() {
        let mut es = EsDescriptor::new(42);
        es.stream_priority = 5;
        es.depends_on = Some(7);
        es.url = Some("rtsp://example".into());
        es.ocr_es_id = Some(9);

        let descriptor = Descriptor::from(es);
        let decoded = round_trip(&descriptor);
        assert_eq!(decoded, descriptor);

        match decoded {
            Descriptor::Es(es) => {
                assert_eq!(es.es_id, 42);
                assert_eq!(es.stream_priority, 5);
                assert_eq!(es.depends_on, Some(7));
                assert_eq!(es.url.as_deref(), Some("rtsp://example"));
                assert_eq!(es.ocr_es_id, Some(9));
            }
            other => panic!("wrong descriptor: {:?}", other),
        }
    }

    // the OCR field is guarded by the OCR flag, independent of the URL flag
    #[test]
    fn test_es_ocr_without_url() {
        let mut es = EsDescriptor::new(3);
        es.ocr_es_id = Some(11);

        let decoded = round_trip(&Descriptor::from(es));
        match decoded {
            Descriptor::Es(es) => {
                assert_eq!(es.url, None);
                assert_eq!(es.ocr_es_id, Some(11));
            }
            other => panic!("wrong descriptor: {:?}", other),
        }
    }

    #[test]
    fn test_es_sub_descriptors() {
        let mut es = EsDescriptor::new(1);
        es.add_sub_descriptor(Descriptor::Unknown(crate::UnknownDescriptor {
            header: DescriptorHeader::minimal(0x06),
            payload: vec![0x02],
        }));

        let descriptor = Descriptor::from(es);
        assert_eq!(descriptor.payload_size(), 3 + 3);

        let decoded = round_trip(&descriptor);
        match decoded {
            Descriptor::Es(es) => assert_eq!(es.sub_descriptors.len(), 1),
            other => panic!("wrong descriptor: {:?}", other),
        }
    }

    #[test]
    fn test_es_truncated() {
        // declares a stream dependency but ends after the flags byte
        let mut stream = MemoryStream::from_vec(vec![0x03, 0x03, 0x00, 0x01, 0x20]);
        assert!(DescriptorFactory::create_from_stream(&mut stream).is_err());
    }

    #[test]
    fn test_id_descriptors() {
        let inc = Descriptor::from(EsIdIncDescriptor::new(0xdead_beef));
        assert_eq!(inc.size(), 6);
        assert_eq!(round_trip(&inc), inc);

        let re = Descriptor::from(EsIdRefDescriptor::new(3));
        assert_eq!(re.size(), 4);
        assert_eq!(round_trip(&re), re);
    }
}
