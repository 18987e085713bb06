//! Structured-index (`.pul`) tree reader.
//!
//! # Layout
//! ```text
//! magic        4 B   "eerT" (little-endian writer) or "Tree" (big-endian writer)
//! level count  4 B   L
//! level sizes  L × 4 B   on-disk record size per level
//! root node    [record][child count: i32][children...]   recursively
//! ```
//!
//! # Size reconciliation
//! Writers of different format versions use different record sizes per
//! level.  Every record is read at its on-disk size and then zero-padded or
//! truncated to the compiled size of the level's schema before decoding.
//! This never fails; trailing fields of a padded or truncated record carry
//! no correctness guarantee.

use std::fmt;
use std::io::{self, Read, Write};
use std::sync::Arc;

use byteorder::{BigEndian, LittleEndian, WriteBytesExt};
use log::{debug, trace};
use serde::Serialize;

use crate::error::BundleError;
use crate::schema::records;
use crate::schema::{Endian, Record, RecordSchema, SchemaError, Value};

/// Magic as written by a big-endian writer; little-endian writers store it
/// byte-reversed.
pub const TREE_MAGIC: &[u8; 4] = b"Tree";

// ── Level ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum Level {
    Root   = 0,
    Group  = 1,
    Series = 2,
    Sweep  = 3,
    Trace  = 4,
}

impl Level {
    pub const ALL: [Level; 5] = [Level::Root, Level::Group, Level::Series, Level::Sweep, Level::Trace];

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }

    /// Level of this level's children, `None` for traces.
    pub fn child(self) -> Option<Self> {
        Self::from_index(self.index() + 1)
    }

    pub fn name(self) -> &'static str {
        match self {
            Level::Root   => "Root",
            Level::Group  => "Group",
            Level::Series => "Series",
            Level::Sweep  => "Sweep",
            Level::Trace  => "Trace",
        }
    }

    /// Compiled record layout for nodes at this level.
    pub fn schema(self) -> Result<Arc<RecordSchema>, SchemaError> {
        match self {
            Level::Root   => records::root_record(),
            Level::Group  => records::group_record(),
            Level::Series => records::series_record(),
            Level::Sweep  => records::sweep_record(),
            Level::Trace  => records::trace_record(),
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ── TreeNode ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TreeNode {
    level:    Level,
    record:   Record,
    children: Vec<TreeNode>,
}

impl TreeNode {
    pub fn new(level: Level, record: Record) -> Self {
        Self { level, record, children: Vec::new() }
    }

    /// Builder used when assembling trees by hand.
    pub fn with_child(mut self, child: TreeNode) -> Self {
        self.children.push(child);
        self
    }

    pub fn level(&self) -> Level {
        self.level
    }

    pub fn record(&self) -> &Record {
        &self.record
    }

    pub fn field(&self, name: &str) -> Option<&Value> {
        self.record.get(name)
    }

    pub fn children(&self) -> &[TreeNode] {
        &self.children
    }

    pub fn child(&self, index: usize) -> Result<&TreeNode, BundleError> {
        self.children.get(index).ok_or_else(|| BundleError::Index {
            level: self.level.child().unwrap_or(self.level),
            index,
            len:   self.children.len(),
        })
    }

    /// `Label` for groups and below, `VersionName` for the root.
    pub fn label(&self) -> &str {
        let key = if self.level == Level::Root { "VersionName" } else { "Label" };
        self.record.str(key).unwrap_or("")
    }

    /// Total number of nodes in this subtree, including `self`.
    pub fn count(&self) -> usize {
        1 + self.children.iter().map(TreeNode::count).sum::<usize>()
    }
}

// ── Reading ──────────────────────────────────────────────────────────────────

/// Zero-pad or truncate `buf` to `size` bytes.
pub fn reconcile(mut buf: Vec<u8>, size: usize) -> Vec<u8> {
    buf.resize(size, 0);
    buf
}

/// Read exactly `len` bytes.  The buffer grows with the data actually read,
/// so a corrupt length fails with `UnexpectedEof` instead of allocating it
/// up front.
pub(crate) fn read_len<R: Read>(reader: &mut R, len: usize) -> io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    reader.take(len as u64).read_to_end(&mut buf)?;
    if buf.len() != len {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("expected {len} bytes, got {}", buf.len()),
        ));
    }
    Ok(buf)
}

/// Read one node at `level` and, recursively, all of its descendants.
pub fn read_node<R: Read>(
    reader:      &mut R,
    level_sizes: &[usize],
    level:       Level,
    endian:      Endian,
) -> Result<TreeNode, BundleError> {
    let real_size = *level_sizes.get(level.index()).ok_or_else(|| {
        BundleError::format(format!("no record size declared for level {level}"))
    })?;
    let schema = level.schema()?;

    let buf = read_len(reader, real_size)?;
    let record = schema.decode_record(&reconcile(buf, schema.size()), endian)?;

    let nchild = endian.read_i32(&mut *reader)?;
    trace!("{level} node: {real_size} B record, {nchild} children");
    if nchild < 0 {
        return Err(BundleError::format(format!("{level} node declares {nchild} children")));
    }
    if nchild > 0 && level.child().is_none() {
        return Err(BundleError::format(format!("{level} node declares {nchild} children")));
    }

    let mut node = TreeNode::new(level, record);
    if let Some(child_level) = level.child() {
        for _ in 0..nchild {
            node.children.push(read_node(reader, level_sizes, child_level, endian)?);
        }
    }
    Ok(node)
}

/// A fully parsed structured-index sub-resource.
#[derive(Debug, Clone, PartialEq)]
pub struct PulsedTree {
    endian:      Endian,
    level_sizes: Vec<usize>,
    root:        TreeNode,
}

impl PulsedTree {
    pub fn new(endian: Endian, level_sizes: Vec<usize>, root: TreeNode) -> Self {
        Self { endian, level_sizes, root }
    }

    /// Parse the tree starting at the reader's current position.
    pub fn read<R: Read>(mut reader: R) -> Result<Self, BundleError> {
        let mut magic = [0u8; 4];
        reader.read_exact(&mut magic)?;
        let endian = if &magic == TREE_MAGIC {
            Endian::Big
        } else if magic.iter().rev().eq(TREE_MAGIC.iter()) {
            Endian::Little
        } else {
            return Err(BundleError::format(format!("bad tree magic {magic:?}")));
        };

        let levels = endian.read_i32(&mut reader)?;
        if levels < 0 {
            return Err(BundleError::format(format!("negative level count {levels}")));
        }
        let mut level_sizes = Vec::with_capacity(Level::ALL.len());
        for _ in 0..levels {
            let size = endian.read_i32(&mut reader)?;
            let size = usize::try_from(size)
                .map_err(|_| BundleError::format(format!("negative record size {size}")))?;
            level_sizes.push(size);
        }

        for (level, &size) in Level::ALL.iter().zip(&level_sizes) {
            let compiled = level.schema()?.size();
            if size != compiled {
                debug!("{level} records are {size} B on disk, {compiled} B compiled; reconciling");
            }
        }

        let root = read_node(&mut reader, &level_sizes, Level::Root, endian)?;
        debug!("read {endian} tree: {} nodes, level sizes {level_sizes:?}", root.count());
        Ok(Self { endian, level_sizes, root })
    }

    pub fn endian(&self) -> Endian {
        self.endian
    }

    pub fn level_sizes(&self) -> &[usize] {
        &self.level_sizes
    }

    pub fn root(&self) -> &TreeNode {
        &self.root
    }

    /// Follow child indices from the root, one per level.
    pub fn node(&self, path: &[usize]) -> Result<&TreeNode, BundleError> {
        path.iter().try_fold(&self.root, |node, &i| node.child(i))
    }

    pub fn trace(&self, group: usize, series: usize, sweep: usize, trace: usize) -> Result<&TreeNode, BundleError> {
        self.node(&[group, series, sweep, trace])
    }

    /// Serialise the tree, writing every record at its level's on-disk size.
    pub fn write<W: Write>(&self, mut writer: W) -> Result<(), BundleError> {
        match self.endian {
            Endian::Big    => writer.write_all(TREE_MAGIC)?,
            Endian::Little => {
                let mut magic = *TREE_MAGIC;
                magic.reverse();
                writer.write_all(&magic)?;
            }
        }
        write_i32(&mut writer, self.endian, self.level_sizes.len() as i32)?;
        for &size in &self.level_sizes {
            write_i32(&mut writer, self.endian, size as i32)?;
        }
        self.write_node(&mut writer, &self.root)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, BundleError> {
        let mut out = Vec::new();
        self.write(&mut out)?;
        Ok(out)
    }

    fn write_node<W: Write>(&self, writer: &mut W, node: &TreeNode) -> Result<(), BundleError> {
        let size = *self.level_sizes.get(node.level.index()).ok_or_else(|| {
            BundleError::format(format!("no record size declared for level {}", node.level))
        })?;
        let bytes = node.level.schema()?.encode_record(&node.record, self.endian)?;
        writer.write_all(&reconcile(bytes, size))?;
        write_i32(writer, self.endian, node.children.len() as i32)?;
        for child in &node.children {
            self.write_node(writer, child)?;
        }
        Ok(())
    }
}

fn write_i32<W: Write>(writer: &mut W, endian: Endian, v: i32) -> std::io::Result<()> {
    match endian {
        Endian::Little => writer.write_i32::<LittleEndian>(v),
        Endian::Big    => writer.write_i32::<BigEndian>(v),
    }
}
