use crate::{
    AtomInspector, ByteStream, Descriptor, DescriptorFactory, DescriptorHeader, Error, FormatHint,
    Result,
};

pub const OBJECT_DESCRIPTOR_TAG_OD: u8 = 0x01;
pub const OBJECT_DESCRIPTOR_TAG_IOD: u8 = 0x02;
pub const OBJECT_DESCRIPTOR_TAG_MP4_IOD: u8 = 0x10;
pub const OBJECT_DESCRIPTOR_TAG_MP4_OD: u8 = 0x11;

/// The five profile-level indications of an initial object descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OdProfiles {
    pub od: u8,
    pub scene: u8,
    pub audio: u8,
    pub visual: u8,
    pub graphics: u8,
}

/// The object descriptor carried by `iods` atoms (tags 0x01/0x11), and its
/// initial-object variant (tags 0x02/0x10) which adds the profile-level
/// bytes. Sub-descriptors are usually ES-ID-Inc or ES-ID-Ref references.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectDescriptor {
    pub(crate) header: DescriptorHeader,
    // 10-bit id, URL flag and reserved bits, kept verbatim for round-trips
    bits: u16,
    pub url: Option<String>,
    pub profiles: Option<OdProfiles>,
    pub sub_descriptors: Vec<Descriptor>,
}

impl ObjectDescriptor {
    pub fn new(tag: u8, od_id: u16) -> Self {
        ObjectDescriptor {
            header: DescriptorHeader::minimal(tag),
            bits: od_id << 6 | 0x1f,
            url: None,
            profiles: None,
            sub_descriptors: Vec::new(),
        }
    }

    pub fn od_id(&self) -> u16 {
        self.bits >> 6
    }

    pub fn url_flag(&self) -> bool {
        self.bits & 0x20 != 0
    }

    pub fn set_url(&mut self, url: Option<String>) {
        match url {
            Some(_) => self.bits |= 0x20,
            None => self.bits &= !0x20,
        }
        self.url = url;
    }

    pub fn add_sub_descriptor(&mut self, descriptor: Descriptor) {
        self.sub_descriptors.push(descriptor);
    }

    fn is_initial(&self) -> bool {
        matches!(
            self.header.tag,
            OBJECT_DESCRIPTOR_TAG_IOD | OBJECT_DESCRIPTOR_TAG_MP4_IOD
        )
    }

    pub fn payload_size(&self) -> u32 {
        let mut size = 2;
        if let Some(url) = &self.url {
            size += 1 + url.len() as u32;
        }
        if self.profiles.is_some() {
            size += 5;
        }
        for sub in &self.sub_descriptors {
            size += sub.size();
        }
        size
    }

    pub(crate) fn read(
        stream: &mut dyn ByteStream,
        header: DescriptorHeader,
        payload_size: u32,
    ) -> Result<Self> {
        if payload_size < 2 {
            return Err(Error::NotEnoughData);
        }

        let bits = stream.read_u16()?;
        let mut remaining = payload_size - 2;

        let url_flag = bits & 0x20 != 0;
        let initial = matches!(
            header.tag,
            OBJECT_DESCRIPTOR_TAG_IOD | OBJECT_DESCRIPTOR_TAG_MP4_IOD
        );

        let url = if url_flag {
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

        let profiles = if initial && !url_flag {
            if remaining < 5 {
                return Err(Error::NotEnoughData);
            }
            remaining -= 5;
            Some(OdProfiles {
                od: stream.read_u8()?,
                scene: stream.read_u8()?,
                audio: stream.read_u8()?,
                visual: stream.read_u8()?,
                graphics: stream.read_u8()?,
            })
        } else {
            None
        };

        let sub_descriptors = DescriptorFactory::read_sub_descriptors(stream, remaining)?;

        Ok(ObjectDescriptor {
            header,
            bits,
            url,
            profiles,
            sub_descriptors,
        })
    }

    pub(crate) fn write_fields(&self, stream: &mut dyn ByteStream) -> Result<()> {
        stream.write_u16(self.bits)?;

        if let Some(url) = &self.url {
            stream.write_u8(url.len() as u8)?;
            stream.write_str(url)?;
        }

        if let Some(profiles) = &self.profiles {
            stream.write_u8(profiles.od)?;
            stream.write_u8(profiles.scene)?;
            stream.write_u8(profiles.audio)?;
            stream.write_u8(profiles.visual)?;
            stream.write_u8(profiles.graphics)?;
        }

        for sub in &self.sub_descriptors {
            sub.write(stream)?;
        }

        Ok(())
    }

    pub(crate) fn inspect(&self, inspector: &mut dyn AtomInspector) -> Result<()> {
        let name = if self.is_initial() {
            "InitialObjectDescriptor"
        } else {
            "ObjectDescriptor"
        };

        let payload_size = self.payload_size();
        let header_size = self.header.header_size(payload_size);
        inspector.start_descriptor(name, header_size, (header_size + payload_size) as u64)?;
        inspector.add_uint(Some("od_id"), self.od_id() as u64, FormatHint::Dec)?;

        if let Some(url) = &self.url {
            inspector.add_str(Some("url"), url)?;
        }

        if let Some(profiles) = &self.profiles {
            inspector.add_uint(Some("od_profile_level"), profiles.od as u64, FormatHint::Dec)?;
            inspector.add_uint(
                Some("scene_profile_level"),
                profiles.scene as u64,
                FormatHint::Dec,
            )?;
            inspector.add_uint(
                Some("audio_profile_level"),
                profiles.audio as u64,
                FormatHint::Dec,
            )?;
            inspector.add_uint(
                Some("visual_profile_level"),
                profiles.visual as u64,
                FormatHint::Dec,
            )?;
            inspector.add_uint(
                Some("graphics_profile_level"),
                profiles.graphics as u64,
                FormatHint::Dec,
            )?;
        }

        for sub in &self.sub_descriptors {
            sub.inspect(inspector)?;
        }

        inspector.end_descriptor()
    }
}
