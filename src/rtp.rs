use crate::{AtomInspector, ByteStream, Error, FormatHint, MemoryStream, Result};

/// Every packetization constructor occupies exactly 16 bytes on the wire.
pub const RTP_CONSTRUCTOR_SIZE: u32 = 16;

const RTP_CONSTRUCTOR_TYPE_NOOP: u8 = 0;
const RTP_CONSTRUCTOR_TYPE_IMMEDIATE: u8 = 1;
const RTP_CONSTRUCTOR_TYPE_SAMPLE: u8 = 2;
const RTP_CONSTRUCTOR_TYPE_SAMPLE_DESC: u8 = 3;

// the only extra-data entry tag defined for hint samples
const ENTRY_TAG_RTPO: u32 = u32::from_be_bytes(*b"rtpo");

/// The payload of one RTP hint sample: a list of packets to emit plus any
/// trailing extra data.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RtpSampleData {
    pub packets: Vec<RtpPacket>,
    pub extra_data: Vec<u8>,
}

impl RtpSampleData {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a hint sample of `size` bytes starting at the cursor.
    pub fn read(stream: &mut dyn ByteStream, size: u32) -> Result<Self> {
        let start = stream.tell();

        let packet_count = stream.read_u16()?;
        let _reserved = stream.read_u16()?;

        let mut packets = Vec::with_capacity(packet_count.min(1024) as usize);
        for _ in 0..packet_count {
            packets.push(RtpPacket::read(stream)?);
        }

        let consumed = stream.tell() - start;
        let extra_size = (size as u64)
            .checked_sub(consumed)
            .ok_or(Error::InvalidFormat("rtp packets overrun the sample size"))?;
        let mut extra_data = vec![0u8; extra_size as usize];
        stream.read(&mut extra_data)?;

        Ok(RtpSampleData {
            packets,
            extra_data,
        })
    }

    pub fn add_packet(&mut self, packet: RtpPacket) {
        self.packets.push(packet);
    }

    /// The serialized size in bytes.
    pub fn size(&self) -> u32 {
        let mut size = 4;
        for packet in &self.packets {
            size += packet.size();
        }
        size + self.extra_data.len() as u32
    }

    pub fn write(&self, stream: &mut dyn ByteStream) -> Result<()> {
        stream.write_u16(self.packets.len() as u16)?;
        stream.write_u16(0)?; // reserved

        for packet in &self.packets {
            packet.write(stream)?;
        }

        stream.write(&self.extra_data)
    }

    /// Serialize into a fresh memory stream, cursor rewound.
    pub fn to_stream(&self) -> Result<MemoryStream> {
        let mut stream = MemoryStream::new();
        self.write(&mut stream)?;
        stream.seek(0)?;

        Ok(stream)
    }

    pub fn inspect(&self, inspector: &mut dyn AtomInspector) -> Result<()> {
        inspector.start_object(Some("rtp sample data"), 2, false)?;
        inspector.add_uint(
            Some("packet_count"),
            self.packets.len() as u64,
            FormatHint::Dec,
        )?;

        inspector.start_array(Some("packets"), self.packets.len())?;
        for packet in &self.packets {
            packet.inspect(inspector)?;
        }
        inspector.end_array()?;

        if !self.extra_data.is_empty() {
            inspector.add_bytes(Some("extra data"), &self.extra_data)?;
        }

        inspector.end_object()
    }
}

/// One packet envelope inside a hint sample.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RtpPacket {
    pub relative_time: i32,
    pub p_bit: bool,
    pub x_bit: bool,
    pub m_bit: bool,
    pub payload_type: u8,
    pub sequence_seed: u16,
    /// Carried in an `rtpo` extra-data entry; zero means none is written.
    pub time_stamp_offset: u32,
    pub b_frame_flag: bool,
    pub repeat_flag: bool,
    pub constructors: Vec<RtpConstructor>,
}

impl RtpPacket {
    pub fn read(stream: &mut dyn ByteStream) -> Result<Self> {
        let relative_time = stream.read_u32()? as i32;

        let octet = stream.read_u8()?;
        let p_bit = octet & 0x20 != 0;
        let x_bit = octet & 0x10 != 0;

        let octet = stream.read_u8()?;
        let m_bit = octet & 0x80 != 0;
        let payload_type = octet & 0x7f;

        let sequence_seed = stream.read_u16()?;

        let _unused = stream.read_u8()?;
        let octet = stream.read_u8()?;
        let extra_flag = octet & 0x04 != 0;
        let b_frame_flag = octet & 0x02 != 0;
        let repeat_flag = octet & 0x01 != 0;

        let constructor_count = stream.read_u16()?;

        let mut time_stamp_offset = 0;
        if extra_flag {
            // the length is inclusive of its own four bytes
            let extra_length = stream.read_u32()?;
            if extra_length < 4 {
                return Err(Error::InvalidFormat("rtp extra data shorter than its length"));
            }

            let mut remaining = extra_length - 4;
            while remaining > 0 {
                let entry_length = stream.read_u32()?;
                let entry_tag = stream.read_u32()?;

                if entry_length < 8 || entry_length > remaining {
                    return Err(Error::InvalidFormat("bad rtp extra data entry"));
                }

                if entry_tag == ENTRY_TAG_RTPO && entry_length == 12 {
                    time_stamp_offset = stream.read_u32()?;
                } else {
                    tracing::warn!(tag = entry_tag, "skipping unknown rtp extra data entry");
                    stream.seek(stream.tell() + (entry_length - 8) as u64)?;
                }

                remaining -= entry_length;
            }
        }

        let mut constructors = Vec::with_capacity(constructor_count.min(1024) as usize);
        for _ in 0..constructor_count {
            constructors.push(RtpConstructor::read(stream)?);
        }

        Ok(RtpPacket {
            relative_time,
            p_bit,
            x_bit,
            m_bit,
            payload_type,
            sequence_seed,
            time_stamp_offset,
            b_frame_flag,
            repeat_flag,
            constructors,
        })
    }

    pub fn add_constructor(&mut self, constructor: RtpConstructor) {
        self.constructors.push(constructor);
    }

    /// The serialized size in bytes.
    pub fn size(&self) -> u32 {
        let extra = if self.time_stamp_offset != 0 { 16 } else { 0 };
        12 + extra + self.constructors.len() as u32 * RTP_CONSTRUCTOR_SIZE
    }

    pub fn write(&self, stream: &mut dyn ByteStream) -> Result<()> {
        if self.payload_type > 128 {
            return Err(Error::Failure);
        }

        stream.write_u32(self.relative_time as u32)?;
        stream.write_u8(0x80 | (self.p_bit as u8) << 5 | (self.x_bit as u8) << 4)?;
        stream.write_u8((self.m_bit as u8) << 7 | self.payload_type)?;
        stream.write_u16(self.sequence_seed)?;
        stream.write_u8(0)?;

        let extra_flag = self.time_stamp_offset != 0;
        stream.write_u8(
            (extra_flag as u8) << 2 | (self.b_frame_flag as u8) << 1 | self.repeat_flag as u8,
        )?;

        stream.write_u16(self.constructors.len() as u16)?;

        if extra_flag {
            stream.write_u32(16)?; // total length, self inclusive
            stream.write_u32(12)?; // entry length
            stream.write_u32(ENTRY_TAG_RTPO)?;
            stream.write_u32(self.time_stamp_offset)?;
        }

        for constructor in &self.constructors {
            constructor.write(stream)?;
        }

        Ok(())
    }

    /// The size of the RTP payload the constructors will assemble,
    /// including the 12-byte RTP header.
    pub fn constructed_data_size(&self) -> u32 {
        let mut size = 12;
        for constructor in &self.constructors {
            size += constructor.constructed_data_size();
        }
        size
    }

    pub fn inspect(&self, inspector: &mut dyn AtomInspector) -> Result<()> {
        inspector.start_object(None, 5, false)?;
        inspector.add_uint(
            Some("relative_time"),
            self.relative_time as u32 as u64,
            FormatHint::Dec,
        )?;
        inspector.add_uint(Some("payload_type"), self.payload_type as u64, FormatHint::Dec)?;
        inspector.add_uint(
            Some("sequence_seed"),
            self.sequence_seed as u64,
            FormatHint::Dec,
        )?;
        if self.time_stamp_offset != 0 {
            inspector.add_uint(
                Some("time_stamp_offset"),
                self.time_stamp_offset as u64,
                FormatHint::Dec,
            )?;
        }

        inspector.start_array(Some("constructors"), self.constructors.len())?;
        for constructor in &self.constructors {
            constructor.inspect(inspector)?;
        }
        inspector.end_array()?;

        inspector.end_object()
    }
}

/// A 16-byte record describing how to assemble one region of an outgoing
/// RTP payload: literal bytes, a media-sample reference, or a
/// sample-description reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RtpConstructor {
    Noop,
    /// Up to 14 literal bytes copied into the payload.
    Immediate { data: Vec<u8> },
    Sample {
        track_ref_index: u8,
        length: u16,
        sample_num: u32,
        sample_offset: u32,
        bytes_per_block: u16,
        samples_per_block: u16,
    },
    SampleDesc {
        track_ref_index: u8,
        length: u16,
        sample_desc_index: u32,
        sample_desc_offset: u32,
        reserved: u32,
    },
}

impl RtpConstructor {
    /// A sample reference with the common one-to-one block mapping.
    pub fn sample(track_ref_index: u8, length: u16, sample_num: u32, sample_offset: u32) -> Self {
        RtpConstructor::Sample {
            track_ref_index,
            length,
            sample_num,
            sample_offset,
            bytes_per_block: 1,
            samples_per_block: 1,
        }
    }

    pub fn read(stream: &mut dyn ByteStream) -> Result<Self> {
        let kind = stream.read_u8()?;
        let start = stream.tell();

        let constructor = match kind {
            RTP_CONSTRUCTOR_TYPE_NOOP => RtpConstructor::Noop,
            RTP_CONSTRUCTOR_TYPE_IMMEDIATE => {
                let count = stream.read_u8()?;
                if count > 14 {
                    return Err(Error::InvalidFormat("immediate constructor data too long"));
                }
                let mut data = vec![0u8; count as usize];
                stream.read(&mut data)?;
                RtpConstructor::Immediate { data }
            }
            RTP_CONSTRUCTOR_TYPE_SAMPLE => RtpConstructor::Sample {
                track_ref_index: stream.read_u8()?,
                length: stream.read_u16()?,
                sample_num: stream.read_u32()?,
                sample_offset: stream.read_u32()?,
                bytes_per_block: stream.read_u16()?,
                samples_per_block: stream.read_u16()?,
            },
            RTP_CONSTRUCTOR_TYPE_SAMPLE_DESC => RtpConstructor::SampleDesc {
                track_ref_index: stream.read_u8()?,
                length: stream.read_u16()?,
                sample_desc_index: stream.read_u32()?,
                sample_desc_offset: stream.read_u32()?,
                reserved: stream.read_u32()?,
            },
            _ => return Err(Error::InvalidRtpConstructorType(kind)),
        };

        // every constructor occupies type byte plus 15 payload bytes
        stream.seek(start + 15)?;

        Ok(constructor)
    }

    fn kind(&self) -> u8 {
        match self {
            RtpConstructor::Noop => RTP_CONSTRUCTOR_TYPE_NOOP,
            RtpConstructor::Immediate { .. } => RTP_CONSTRUCTOR_TYPE_IMMEDIATE,
            RtpConstructor::Sample { .. } => RTP_CONSTRUCTOR_TYPE_SAMPLE,
            RtpConstructor::SampleDesc { .. } => RTP_CONSTRUCTOR_TYPE_SAMPLE_DESC,
        }
    }

    fn type_name(&self) -> &'static str {
        match self {
            RtpConstructor::Noop => "NOOP",
            RtpConstructor::Immediate { .. } => "IMMEDIATE",
            RtpConstructor::Sample { .. } => "SAMPLE",
            RtpConstructor::SampleDesc { .. } => "SAMPLE_DESC",
        }
    }

    /// How many payload bytes this constructor contributes.
    pub fn constructed_data_size(&self) -> u32 {
        match self {
            RtpConstructor::Noop => 0,
            RtpConstructor::Immediate { data } => data.len() as u32,
            RtpConstructor::Sample { length, .. } => *length as u32,
            RtpConstructor::SampleDesc { length, .. } => *length as u32,
        }
    }

    pub fn write(&self, stream: &mut dyn ByteStream) -> Result<()> {
        stream.write_u8(self.kind())?;

        match self {
            RtpConstructor::Noop => stream.write(&[0u8; 15]),
            RtpConstructor::Immediate { data } => {
                if data.len() > 14 {
                    return Err(Error::Failure);
                }
                stream.write_u8(data.len() as u8)?;
                stream.write(data)?;
                stream.write(&vec![0u8; 14 - data.len()])
            }
            RtpConstructor::Sample {
                track_ref_index,
                length,
                sample_num,
                sample_offset,
                bytes_per_block,
                samples_per_block,
            } => {
                stream.write_u8(*track_ref_index)?;
                stream.write_u16(*length)?;
                stream.write_u32(*sample_num)?;
                stream.write_u32(*sample_offset)?;
                stream.write_u16(*bytes_per_block)?;
                stream.write_u16(*samples_per_block)
            }
            RtpConstructor::SampleDesc {
                track_ref_index,
                length,
                sample_desc_index,
                sample_desc_offset,
                reserved,
            } => {
                stream.write_u8(*track_ref_index)?;
                stream.write_u16(*length)?;
                stream.write_u32(*sample_desc_index)?;
                stream.write_u32(*sample_desc_offset)?;
                stream.write_u32(*reserved)
            }
        }
    }

    pub fn inspect(&self, inspector: &mut dyn AtomInspector) -> Result<()> {
        inspector.start_object(None, 4, true)?;
        inspector.add_str(Some("type"), self.type_name())?;

        match self {
            RtpConstructor::Noop => {}
            RtpConstructor::Immediate { data } => {
                inspector.add_bytes(Some("data"), data)?;
            }
            RtpConstructor::Sample {
                track_ref_index,
                length,
                sample_num,
                sample_offset,
                ..
            } => {
                inspector.add_uint(Some("track_ref_index"), *track_ref_index as u64, FormatHint::Dec)?;
                inspector.add_uint(Some("length"), *length as u64, FormatHint::Dec)?;
                inspector.add_uint(Some("sample_num"), *sample_num as u64, FormatHint::Dec)?;
                inspector.add_uint(Some("sample_offset"), *sample_offset as u64, FormatHint::Dec)?;
            }
            RtpConstructor::SampleDesc {
                track_ref_index,
                length,
                sample_desc_index,
                sample_desc_offset,
                ..
            } => {
                inspector.add_uint(Some("track_ref_index"), *track_ref_index as u64, FormatHint::Dec)?;
                inspector.add_uint(Some("length"), *length as u64, FormatHint::Dec)?;
                inspector.add_uint(Some("sample_desc_index"), *sample_desc_index as u64, FormatHint::Dec)?;
                inspector.add_uint(
                    Some("sample_desc_offset"),
                    *sample_desc_offset as u64,
                    FormatHint::Dec,
                )?;
            }
        }

        inspector.end_object()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TextInspector;

    fn sample_packet() -> RtpPacket {
        RtpPacket {
            relative_time: 0,
            p_bit: false,
            x_bit: false,
            m_bit: true,
            payload_type: 96,
            sequence_seed: 7,
            time_stamp_offset: 0,
            b_frame_flag: false,
            repeat_flag: false,
            constructors: vec![
                RtpConstructor::Immediate {
                    data: vec![0x00, 0x01],
                },
                RtpConstructor::sample(1, 1400, 12, 0),
            ],
        }
    }

    #[test]
    fn test_round_trip() {
        let mut data = RtpSampleData::new();
        data.add_packet(sample_packet());
        data.extra_data = vec![0xde, 0xad];

        let stream = data.to_stream().unwrap();
        assert_eq!(stream.size(), data.size() as u64);

        let mut stream = stream;
        let decoded = RtpSampleData::read(&mut stream, data.size()).unwrap();
        assert_eq!(decoded, data);
    }

    #[test]
    fn test_packet_size() {
        let packet = sample_packet();
        assert_eq!(packet.size(), 12 + 2 * RTP_CONSTRUCTOR_SIZE);

        let mut with_offset = packet.clone();
        with_offset.time_stamp_offset = 90_000;
        assert_eq!(with_offset.size(), 12 + 16 + 2 * RTP_CONSTRUCTOR_SIZE);
    }

    #[test]
    fn test_timestamp_offset_round_trip() {
        let mut packet = sample_packet();
        packet.time_stamp_offset = 1234;

        let mut data = RtpSampleData::new();
        data.add_packet(packet);

        let mut stream = data.to_stream().unwrap();
        let decoded = RtpSampleData::read(&mut stream, data.size()).unwrap();
        assert_eq!(decoded.packets[0].time_stamp_offset, 1234);
        assert_eq!(decoded, data);
    }

    #[test]
    fn test_unknown_extra_entry_is_skipped() {
        let mut stream = MemoryStream::new();
        stream.write_u16(1).unwrap(); // packet count
        stream.write_u16(0).unwrap(); // reserved

        // packet header with the extra flag set and no constructors
        stream.write_u32(0).unwrap();
        stream.write_u8(0x80).unwrap();
        stream.write_u8(96).unwrap();
        stream.write_u16(1).unwrap();
        stream.write_u8(0).unwrap();
        stream.write_u8(0x04).unwrap();
        stream.write_u16(0).unwrap();

        // extra block: one unknown entry, then an rtpo entry
        stream.write_u32(4 + 12 + 12).unwrap();
        stream.write_u32(12).unwrap();
        stream.write_u32(u32::from_be_bytes(*b"xxxx")).unwrap();
        stream.write_u32(0xffff_ffff).unwrap();
        stream.write_u32(12).unwrap();
        stream.write_u32(ENTRY_TAG_RTPO).unwrap();
        stream.write_u32(555).unwrap();

        let size = stream.size() as u32;
        stream.seek(0).unwrap();
        let decoded = RtpSampleData::read(&mut stream, size).unwrap();
        assert_eq!(decoded.packets[0].time_stamp_offset, 555);
    }

    #[test]
    fn test_invalid_constructor_type() {
        let mut stream = MemoryStream::from_vec(vec![0xee; 16]);
        assert!(matches!(
            RtpConstructor::read(&mut stream),
            Err(Error::InvalidRtpConstructorType(0xee))
        ));
    }

    #[test]
    fn test_payload_type_limit() {
        let mut packet = sample_packet();
        packet.payload_type = 129;

        let mut stream = MemoryStream::new();
        assert!(matches!(packet.write(&mut stream), Err(Error::Failure)));
    }

    #[test]
    fn test_immediate_too_long() {
        let constructor = RtpConstructor::Immediate {
            data: vec![0; 15],
        };
        let mut stream = MemoryStream::new();
        assert!(constructor.write(&mut stream).is_err());
    }

    #[test]
    fn test_constructed_data_size() {
        let packet = sample_packet();
        assert_eq!(packet.constructed_data_size(), 12 + 2 + 1400);
    }

    #[test]
    fn test_inspect_renders() {
        let mut data = RtpSampleData::new();
        data.add_packet(sample_packet());

        let mut inspector = TextInspector::new(Vec::new());
        data.inspect(&mut inspector).unwrap();
        let out = String::from_utf8(inspector.into_inner()).unwrap();

        assert!(out.contains("rtp sample data"));
        assert!(out.contains("type = SAMPLE"));
        assert!(out.contains("length = 1400"));
    }
}
