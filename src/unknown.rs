use crate::{Atom, AtomHeader, ByteStream, Payload, Result, SharedStream, Uuid, ATOM_TYPE_MDAT};

// Atoms at most this large are read into an owned buffer; anything bigger
// (and mdat regardless of size) stays backed by the source stream.
pub(crate) const UNKNOWN_MAX_BUFFERED_SIZE: u64 = 4096;

/// Payload storage for atoms with no registered parser.
#[derive(Debug, Clone)]
pub enum UnknownPayload {
    /// The payload bytes, owned; the source stream has been released.
    Buffered(Vec<u8>),
    /// Only the source position is recorded; serialization copies the
    /// payload straight from the shared source stream.
    Deferred { stream: SharedStream, position: u64 },
}

impl UnknownPayload {
    pub(crate) fn write(&self, payload_size: u64, stream: &mut dyn ByteStream) -> Result<()> {
        match self {
            UnknownPayload::Buffered(payload) => stream.write(payload),
            UnknownPayload::Deferred {
                stream: source,
                position,
            } => {
                let mut source = source.borrow_mut();
                let saved = source.tell();
                source.seek(*position)?;
                let result = source.copy_to(stream, payload_size);
                source.seek(saved)?;
                result
            }
        }
    }
}

impl Atom {
    /// Build an unknown atom whose header has already been read; the
    /// stream cursor sits at the start of the payload. A declared size
    /// extending past the end of the stream is clamped to what is there,
    /// keeping the 32- or 64-bit encoding form.
    pub(crate) fn unknown_from_stream(
        mut header: AtomHeader,
        uuid: Option<Uuid>,
        stream: &SharedStream,
    ) -> Result<Atom> {
        let header_size = header.header_size() as u64 + if uuid.is_some() { 16 } else { 0 };
        let (position, stream_size) = {
            let source = stream.borrow();
            (source.tell(), source.size())
        };

        if position - header_size + header.size() > stream_size {
            tracing::warn!(
                kind = %header.kind,
                declared = header.size(),
                "atom extends past end of stream, clamping"
            );
            header.set_size(stream_size - position + header_size, header.is_long());
        }

        if header.size() <= UNKNOWN_MAX_BUFFERED_SIZE && header.kind != ATOM_TYPE_MDAT {
            let mut payload = vec![0u8; (header.size() - header_size) as usize];
            stream.borrow_mut().read(&mut payload)?;

            return Ok(Atom {
                header,
                uuid,
                payload: Payload::Unknown(UnknownPayload::Buffered(payload)),
            });
        }

        Ok(Atom {
            header,
            uuid,
            payload: Payload::Unknown(UnknownPayload::Deferred {
                stream: stream.clone(),
                position,
            }),
        })
    }
}
