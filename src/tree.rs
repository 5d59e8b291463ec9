use crate::path::{self, SegmentKey};
use crate::{
    share, Atom, AtomFactory, AtomInspector, ByteStream, Error, FourCC, MemoryStream, Payload,
    Result, Uuid,
};

// Atoms larger than this refuse the serialize-and-reparse clone path.
const MAX_CLONE_SIZE: u64 = 1 << 20;

// A child that serializes short of its declared size is padded with zeros
// up to this many bytes; anything more is a failure.
const MAX_LIST_PADDING: u64 = 1024;

/// Stable handle to an atom owned by a [Tree].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AtomId(usize);

#[derive(Debug)]
struct Node {
    atom: Atom,
    parent: Option<AtomId>,
}

/// The arena owning every atom, with the parent of each recorded as a
/// non-owning back-link.
///
/// Containers list their children as ids into the arena; the invariant is
/// that an id appears in exactly one child list, and its node's parent
/// link names that container. All structural mutation goes through the
/// tree so the two stay consistent and ancestor sizes are kept current.
#[derive(Debug, Default)]
pub struct Tree {
    nodes: Vec<Option<Node>>,
    free: Vec<usize>,
}

impl Tree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a rootless atom, returning its handle.
    pub fn insert(&mut self, atom: Atom) -> AtomId {
        let node = Node { atom, parent: None };
        match self.free.pop() {
            Some(index) => {
                self.nodes[index] = Some(node);
                AtomId(index)
            }
            None => {
                self.nodes.push(Some(node));
                AtomId(self.nodes.len() - 1)
            }
        }
    }

    fn node(&self, id: AtomId) -> &Node {
        self.nodes[id.0].as_ref().expect("stale atom id")
    }

    fn node_mut(&mut self, id: AtomId) -> &mut Node {
        self.nodes[id.0].as_mut().expect("stale atom id")
    }

    pub fn get(&self, id: AtomId) -> &Atom {
        &self.node(id).atom
    }

    /// Mutable access to an atom. After editing a payload in a way that
    /// changes its serialized length, call [Tree::refresh_size].
    pub fn get_mut(&mut self, id: AtomId) -> &mut Atom {
        &mut self.node_mut(id).atom
    }

    pub fn parent(&self, id: AtomId) -> Option<AtomId> {
        self.node(id).parent
    }

    /// The child list; empty for non-containers.
    pub fn children(&self, id: AtomId) -> &[AtomId] {
        self.get(id)
            .children()
            .map(|children| children.as_slice())
            .unwrap_or(&[])
    }

    /// Attach a rootless atom to a container. `None` appends, `Some(i)`
    /// inserts before the current i-th child; `i` past the end is out of
    /// range. An atom that already has a parent is rejected.
    pub fn add_child(&mut self, parent: AtomId, child: AtomId, position: Option<usize>) -> Result<()> {
        if self.node(child).parent.is_some() {
            return Err(Error::InvalidParameters);
        }

        {
            let children = self
                .node_mut(parent)
                .atom
                .children_mut()
                .ok_or(Error::InvalidParameters)?;

            match position {
                None => children.push(child),
                Some(index) if index <= children.len() => children.insert(index, child),
                Some(_) => return Err(Error::OutOfRange),
            }
        }

        self.node_mut(child).parent = Some(parent);
        self.refresh_size(parent);

        Ok(())
    }

    /// Detach `child` from `parent`, which must be its current owner. The
    /// child stays in the arena, rootless, owned by the caller.
    pub fn remove_child(&mut self, parent: AtomId, child: AtomId) -> Result<()> {
        if self.node(child).parent != Some(parent) {
            return Err(Error::InvalidParameters);
        }

        let children = self
            .node_mut(parent)
            .atom
            .children_mut()
            .ok_or(Error::InvalidParameters)?;
        let index = children
            .iter()
            .position(|&c| c == child)
            .ok_or(Error::InvalidParameters)?;
        children.remove(index);

        self.node_mut(child).parent = None;
        self.refresh_size(parent);

        Ok(())
    }

    /// Remove the n-th child of the given kind and drop its subtree.
    pub fn delete_child(&mut self, parent: AtomId, kind: FourCC, index: usize) -> Result<()> {
        let child = self.get_child(parent, kind, index).ok_or(Error::Failure)?;
        self.remove_child(parent, child)?;
        self.free_subtree(child);

        Ok(())
    }

    /// Remove the atom from its parent; a no-op when rootless.
    pub fn detach(&mut self, id: AtomId) -> Result<()> {
        match self.parent(id) {
            Some(parent) => self.remove_child(parent, id),
            None => Ok(()),
        }
    }

    /// Detach the atom and drop it and its whole subtree from the arena.
    pub fn free(&mut self, id: AtomId) -> Result<()> {
        self.detach(id)?;
        self.free_subtree(id);

        Ok(())
    }

    fn free_subtree(&mut self, id: AtomId) {
        if let Some(children) = self.get(id).children().cloned() {
            for child in children {
                self.free_subtree(child);
            }
        }
        self.nodes[id.0] = None;
        self.free.push(id.0);
    }

    /// The n-th direct child with the given kind.
    pub fn get_child(&self, parent: AtomId, kind: FourCC, index: usize) -> Option<AtomId> {
        let mut index = index;
        for &child in self.children(parent) {
            if self.get(child).kind() == kind {
                if index == 0 {
                    return Some(child);
                }
                index -= 1;
            }
        }

        None
    }

    /// The n-th direct `uuid` child with the given extended type.
    pub fn get_child_by_uuid(&self, parent: AtomId, uuid: &Uuid, index: usize) -> Option<AtomId> {
        let mut index = index;
        for &child in self.children(parent) {
            if self.get(child).uuid.as_ref() == Some(uuid) {
                if index == 0 {
                    return Some(child);
                }
                index -= 1;
            }
        }

        None
    }

    /// Resolve a slash-separated lookup path against `from`'s children.
    /// `None` on a malformed path, a missing segment, or a non-container
    /// interior node.
    pub fn find_child(&self, from: AtomId, path: &str) -> Option<AtomId> {
        let segments = path::parse(path)?;
        if segments.is_empty() {
            return None;
        }

        let mut current = from;
        for (i, segment) in segments.iter().enumerate() {
            let next = match segment.key {
                SegmentKey::Code(kind) => self.get_child(current, kind, segment.index),
                SegmentKey::Uuid(uuid) => self.get_child_by_uuid(current, &uuid, segment.index),
            }?;

            if i + 1 < segments.len() && !self.get(next).is_container() {
                return None;
            }
            current = next;
        }

        Some(current)
    }

    /// Like [Tree::find_child], but a missing segment with index 0 creates
    /// an empty container atom of that kind (full when `full` is set) and
    /// descends into it.
    pub fn find_or_create(&mut self, from: AtomId, path: &str, full: bool) -> Option<AtomId> {
        let segments = path::parse(path)?;
        if segments.is_empty() {
            return None;
        }

        let mut current = from;
        for (i, segment) in segments.iter().enumerate() {
            let found = match segment.key {
                SegmentKey::Code(kind) => self.get_child(current, kind, segment.index),
                SegmentKey::Uuid(uuid) => self.get_child_by_uuid(current, &uuid, segment.index),
            };

            let next = match found {
                Some(next) => next,
                None => {
                    if segment.index != 0 {
                        return None;
                    }
                    let kind = match segment.key {
                        SegmentKey::Code(kind) => kind,
                        SegmentKey::Uuid(_) => return None,
                    };

                    let atom = if full {
                        Atom::full_container(kind, 0, 0)
                    } else {
                        Atom::container(kind)
                    };
                    let id = self.insert(atom);
                    self.add_child(current, id, None).ok()?;
                    id
                }
            };

            if i + 1 < segments.len() && !self.get(next).is_container() {
                return None;
            }
            current = next;
        }

        Some(current)
    }

    /// Deep-clone every child of `source` and append the clones to `dest`.
    pub fn copy_children(&mut self, source: AtomId, dest: AtomId) -> Result<()> {
        let children: Vec<AtomId> = self.children(source).to_vec();
        for child in children {
            let clone = self.clone_atom(child).ok_or(Error::Failure)?;
            self.add_child(dest, clone, None)?;
        }

        Ok(())
    }

    /// Deep-copy an atom, returning a rootless handle. Unknown and string
    /// atoms copy their payload directly (a deferred payload re-shares the
    /// source stream); containers clone child by child; descriptor atoms
    /// serialize into memory and parse back, refusing anything over 1 MiB.
    /// `None` when the atom cannot be cloned.
    pub fn clone_atom(&mut self, id: AtomId) -> Option<AtomId> {
        enum Strategy {
            Structural,
            Container,
            Reparse,
        }

        let strategy = match self.get(id).payload {
            Payload::Unknown(_) | Payload::NullString(_) => Strategy::Structural,
            Payload::Container(_) => Strategy::Container,
            Payload::Esds(_) | Payload::Iods(_) => Strategy::Reparse,
        };

        match strategy {
            Strategy::Structural => {
                let atom = self.get(id).clone();
                Some(self.insert(atom))
            }
            Strategy::Container => {
                let template = Atom {
                    header: self.get(id).header,
                    uuid: self.get(id).uuid,
                    payload: Payload::Container(Vec::new()),
                };
                let clone = self.insert(template);
                if self.copy_children(id, clone).is_err() {
                    self.free_subtree(clone);
                    return None;
                }
                Some(clone)
            }
            Strategy::Reparse => {
                if self.get(id).size() > MAX_CLONE_SIZE {
                    return None;
                }

                let mut memory = MemoryStream::new();
                self.write(id, &mut memory).ok()?;
                memory.seek(0).ok()?;

                let stream = share(memory);
                AtomFactory::new().create_from_stream(self, &stream).ok()?
            }
        }
    }

    /// Recompute the atom's size from its payload and propagate the change
    /// up through its ancestors. Structural mutation does this on its own;
    /// call it after editing a payload through [Tree::get_mut].
    pub fn refresh_size(&mut self, id: AtomId) {
        let mut current = Some(id);
        while let Some(id) = current {
            // run to a fixed point: growing into the 64-bit size form
            // lengthens the header, which changes the size again
            for _ in 0..2 {
                let total = match &self.get(id).payload {
                    Payload::Container(_) => {
                        let header = self.get(id).header_size() as u64;
                        let children: u64 = self
                            .children(id)
                            .iter()
                            .map(|&child| self.get(child).size())
                            .sum();
                        header + children
                    }
                    Payload::Esds(descriptor) => {
                        self.get(id).header_size() as u64 + descriptor.size() as u64
                    }
                    Payload::Iods(descriptor) => {
                        self.get(id).header_size() as u64 + descriptor.size() as u64
                    }
                    _ => break,
                };
                self.get_mut(id).header.set_size(total, false);
            }
            current = self.parent(id);
        }
    }

    /// Serialize the atom: header, payload fields, children. Writing is
    /// non-destructive; repeated writes produce identical bytes.
    pub fn write(&self, id: AtomId, stream: &mut dyn ByteStream) -> Result<()> {
        let before = stream.tell();
        let atom = self.get(id);

        atom.write_header(stream)?;
        match atom.children() {
            Some(children) => {
                for &child in children {
                    self.write_listed(child, stream)?;
                }
            }
            None => atom.write_fields(stream)?,
        }

        let written = stream.tell() - before;
        if written != atom.size() {
            self.report_size_mismatch(id, written);
            debug_assert_eq!(written, atom.size(), "atom size mismatch");
        }

        Ok(())
    }

    // Child-list writes check each atom against its declared size: an
    // overrun fails, a shortfall is zero-padded up to the limit.
    fn write_listed(&self, id: AtomId, stream: &mut dyn ByteStream) -> Result<()> {
        let before = stream.tell();
        self.write(id, stream)?;

        let written = stream.tell() - before;
        let declared = self.get(id).size();
        if written > declared {
            return Err(Error::Failure);
        }
        if written < declared {
            let padding = declared - written;
            tracing::warn!(
                kind = %self.get(id).kind(),
                padding,
                "atom serialized short of its declared size"
            );
            if padding > MAX_LIST_PADDING {
                return Err(Error::Failure);
            }
            for _ in 0..padding {
                stream.write_u8(0)?;
            }
        }

        Ok(())
    }

    fn report_size_mismatch(&self, id: AtomId, written: u64) {
        tracing::error!(
            declared = self.get(id).size(),
            written,
            "atom size mismatch"
        );

        let mut current = Some(id);
        while let Some(id) = current {
            tracing::error!("  while writing [{}]", self.get(id).name());
            current = self.parent(id);
        }
    }

    /// Render the atom and its subtree through the inspector.
    pub fn inspect(&self, id: AtomId, inspector: &mut dyn AtomInspector) -> Result<()> {
        let atom = self.get(id);
        inspector.start_atom(
            &atom.name(),
            atom.header.version,
            atom.header.flags,
            atom.header_size(),
            atom.size(),
        )?;

        match atom.children() {
            Some(children) => {
                for &child in children {
                    self.inspect(child, inspector)?;
                }
            }
            None => atom.inspect_fields(inspector)?,
        }

        inspector.end_atom()
    }
}
