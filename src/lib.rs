//! # mp4-tree
//!
//! This library provides the generic atom machinery of the ISO Base Media
//! File Format (ISO/IEC 14496-12): a parser, an editable in-memory tree, a
//! bit-exact serializer and diagnostic inspectors for the recursive "box"
//! structure underlying MP4, MOV, 3GP and fragmented MP4 files. It is
//! deliberately low level: beyond containers and a handful of structural
//! kinds it does not interpret box payloads, it preserves them.
//!
//! ## Atoms and the tree
//! Atoms are owned by a [Tree], an arena addressed by [AtomId] handles.
//! Containers list their children by id and every atom records its parent,
//! so structural edits ([Tree::add_child], [Tree::remove_child],
//! [Tree::detach]) keep both sides and all ancestor sizes consistent.
//! Lookup uses slash-separated paths with optional sibling indices, e.g.
//! `moov/trak[1]/mdia`, via [Tree::find_child] and [Tree::find_or_create].
//!
//! ## Streams
//! Parsing and serialization go through [ByteStream], a random-access
//! cursor abstraction with big-endian helpers, implemented by
//! [MemoryStream] and the bounded [SubStream] view. Large or opaque
//! payloads are not copied at parse time: they stay backed by the source
//! stream (shared through a [SharedStream] handle) until written out.
//!
//! ## Inspectors
//! [Tree::inspect] walks the tree through the [AtomInspector] visitor;
//! [TextInspector] renders indented text, [JsonInspector] a JSON document.
//!
//! ## Descriptors and hint samples
//! `esds` and `iods` atoms carry the MPEG-4 descriptor sub-format (tag plus
//! expandable size), handled by [Descriptor] and [DescriptorFactory] with
//! the same parse/serialize/inspect contract. [RtpSampleData] covers the
//! packetization blobs stored in RTP hint-track samples.
//!
//! ## Examples
//!
//! ### Parsing and inspecting
//! ```rust
//! use mp4_tree::{share, AtomFactory, MemoryStream, TextInspector, Tree};
//!
//! # fn main() -> anyhow::Result<()> {
//! // a 16-byte `free` box with an 8-byte zero payload
//! let data = b"\x00\x00\x00\x10free\x00\x00\x00\x00\x00\x00\x00\x00".to_vec();
//! let stream = share(MemoryStream::from_vec(data));
//!
//! let mut tree = Tree::new();
//! let atom = AtomFactory::new()
//!     .create_from_stream(&mut tree, &stream)?
//!     .expect("an atom");
//! assert_eq!(tree.get(atom).size(), 16);
//!
//! let mut inspector = TextInspector::new(Vec::new());
//! tree.inspect(atom, &mut inspector)?;
//! assert_eq!(
//!     String::from_utf8(inspector.into_inner())?,
//!     "[free] size=8+8\n"
//! );
//! # Ok(()) }
//! ```
//!
//! ### Building and serializing
//! ```rust
//! use mp4_tree::{Atom, ByteStream, FourCC, MemoryStream, Tree};
//!
//! # fn main() -> anyhow::Result<()> {
//! let mut tree = Tree::new();
//! let moov = tree.insert(Atom::container(FourCC::new(b"moov")));
//! let udta = tree.insert(Atom::container(FourCC::new(b"udta")));
//! let name = tree.insert(Atom::null_string(FourCC::new(b"name"), "demo"));
//! tree.add_child(moov, udta, None)?;
//! tree.add_child(udta, name, None)?;
//!
//! // container sizes track their children
//! assert_eq!(tree.get(moov).size(), 8 + 8 + 13);
//!
//! let mut out = MemoryStream::new();
//! tree.write(moov, &mut out)?;
//! assert_eq!(out.size(), tree.get(moov).size());
//! # Ok(()) }
//! ```

mod atom;
mod descriptor;
mod error;
mod factory;
mod header;
mod inspect;
mod path;
mod rtp;
mod stream;
mod tree;
mod types;
mod unknown;

pub use atom::*;
pub use descriptor::*;
pub use error::*;
pub use factory::*;
pub use header::*;
pub use inspect::*;
pub use rtp::*;
pub use stream::*;
pub use tree::*;
pub use types::*;
pub use unknown::*;
