//! The lookup path grammar: slash-separated segments, each a 4-character
//! code or a 32-hex-character uuid, with an optional `[n]` sibling index.
//! Example: `moov/trak[1]/mdia/minf/stbl/stsd`.

use crate::{FourCC, Uuid};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SegmentKey {
    Code(FourCC),
    Uuid(Uuid),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Segment {
    pub key: SegmentKey,
    pub index: usize,
}

/// Parse a path into segments; `None` on a malformed path.
pub(crate) fn parse(path: &str) -> Option<Vec<Segment>> {
    let mut segments = Vec::new();
    let mut rest = path;

    while !rest.is_empty() {
        let name_len = rest.find(['/', '[']).unwrap_or(rest.len());

        let key = match name_len {
            4 => {
                let code: [u8; 4] = rest.as_bytes()[..4].try_into().ok()?;
                SegmentKey::Code(code.into())
            }
            32 => SegmentKey::Uuid(Uuid::parse_hex(&rest[..32])?),
            _ => return None,
        };
        rest = &rest[name_len..];

        let mut index = 0;
        if let Some(after) = rest.strip_prefix('[') {
            let close = after.find(']')?;
            if !after[..close].bytes().all(|b| b.is_ascii_digit()) {
                return None;
            }
            for b in after[..close].bytes() {
                index = index * 10 + (b - b'0') as usize;
            }
            rest = &after[close + 1..];
        }

        match rest.strip_prefix('/') {
            Some(tail) => rest = tail,
            None if rest.is_empty() => {}
            None => return None,
        }

        segments.push(Segment { key, index });
    }

    Some(segments)
}
