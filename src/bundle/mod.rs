//! Bundle header, catalog and lazily loaded sub-resources.
//!
//! ```no_run
//! use pmbundle::Bundle;
//!
//! let bundle = Bundle::open("DemoV9Bundle.dat")?;
//! let root = bundle.tree()?.root();
//! println!("{} groups", root.children().len());
//! let samples = bundle.read_samples(0, 0, 0, 0)?;
//! # Ok::<(), pmbundle::BundleError>(())
//! ```
//!
//! # Header
//! The first 256 bytes hold the signature, version text, time, item count,
//! a 12-byte endianness marker and 12 catalog slots.  The header is read
//! little-endian first; an all-zero marker means the writer was big-endian
//! and the same bytes are decoded again in that order.
//!
//! # Catalog
//! Each non-empty slot maps an extension (`.pul`, `.dat`, ...) to a byte
//! range.  Loaders are resolved from the [`LoaderRegistry`] when the catalog
//! is built; the typed instance of an entry is built on first access and
//! kept for the lifetime of the [`Bundle`].

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

use log::{debug, warn};

use crate::error::BundleError;
use crate::samples::{SampleData, TraceInfo};
use crate::schema::records::{self, BUNDLE_HEADER_SIZE};
use crate::schema::{Endian, Record};
use crate::tree::PulsedTree;

/// Signature of a bundled Patchmaster file.
pub const BUNDLE_SIGNATURE: &str = "DAT2";

pub const EXT_TREE:    &str = ".pul";
pub const EXT_SAMPLES: &str = ".dat";

// ── BundleItem / loaders ─────────────────────────────────────────────────────

/// A materialised sub-resource.
#[derive(Debug)]
pub enum BundleItem {
    Tree(PulsedTree),
    Samples(SampleData),
    /// Anything built by a caller-registered loader.
    Other(Box<dyn Any + Send + Sync>),
}

impl BundleItem {
    pub fn as_tree(&self) -> Option<&PulsedTree> {
        match self {
            BundleItem::Tree(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_samples(&self) -> Option<&SampleData> {
        match self {
            BundleItem::Samples(s) => Some(s),
            _ => None,
        }
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        match self {
            BundleItem::Other(any) => any.downcast_ref(),
            _ => None,
        }
    }
}

/// Where a loader finds its sub-resource.
#[derive(Debug, Clone, Copy)]
pub struct ItemSource<'a> {
    pub path:   &'a Path,
    pub ext:    &'a str,
    pub start:  u64,
    pub length: u64,
    /// Byte order declared by the bundle header.
    pub endian: Endian,
}

pub trait ItemLoader: Send + Sync {
    fn load(&self, source: &ItemSource<'_>) -> Result<BundleItem, BundleError>;
}

/// Parses the structured-index tree.
pub struct TreeLoader;
impl ItemLoader for TreeLoader {
    fn load(&self, source: &ItemSource<'_>) -> Result<BundleItem, BundleError> {
        let mut f = File::open(source.path)?;
        f.seek(SeekFrom::Start(source.start))?;
        let tree = PulsedTree::read(BufReader::new(f))?;
        if tree.endian() != source.endian {
            warn!("tree is {} but bundle header is {}", tree.endian(), source.endian);
        }
        Ok(BundleItem::Tree(tree))
    }
}

/// Opens the bulk-data sub-resource; no bytes are read until samples are
/// requested.
pub struct SampleLoader;
impl ItemLoader for SampleLoader {
    fn load(&self, source: &ItemSource<'_>) -> Result<BundleItem, BundleError> {
        Ok(BundleItem::Samples(SampleData::new(source.path, source.start, source.length, source.endian)))
    }
}

/// Extension → loader table.
#[derive(Clone)]
pub struct LoaderRegistry {
    loaders: HashMap<String, Arc<dyn ItemLoader>>,
}

impl LoaderRegistry {
    pub fn empty() -> Self {
        Self { loaders: HashMap::new() }
    }

    pub fn register<L: ItemLoader + 'static>(&mut self, ext: &str, loader: L) -> &mut Self {
        self.loaders.insert(ext.to_owned(), Arc::new(loader));
        self
    }

    pub fn get(&self, ext: &str) -> Option<Arc<dyn ItemLoader>> {
        self.loaders.get(ext).cloned()
    }
}

impl Default for LoaderRegistry {
    fn default() -> Self {
        let mut reg = Self::empty();
        reg.register(EXT_TREE, TreeLoader).register(EXT_SAMPLES, SampleLoader);
        reg
    }
}

impl fmt::Debug for LoaderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut exts: Vec<&String> = self.loaders.keys().collect();
        exts.sort();
        f.debug_struct("LoaderRegistry").field("extensions", &exts).finish()
    }
}

// ── BundleOptions ────────────────────────────────────────────────────────────

/// Configuration for [`Bundle::open_with`].
#[derive(Debug, Clone)]
pub struct BundleOptions {
    /// Header signatures accepted as a bundle.
    pub signatures: Vec<String>,
    pub registry:   LoaderRegistry,
}

impl Default for BundleOptions {
    fn default() -> Self {
        Self {
            signatures: vec![BUNDLE_SIGNATURE.to_owned()],
            registry:   LoaderRegistry::default(),
        }
    }
}

// ── Header ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct BundleHeader {
    pub signature: String,
    pub version:   String,
    pub time:      f64,
    pub items:     i32,
    pub endian_marker: [u8; 12],
    pub endian:    Endian,
}

/// One catalog slot as stored in the header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogSlot {
    pub start:  u64,
    pub length: u64,
    pub ext:    String,
}

/// Parse the fixed header region, resolving the byte order.
pub fn parse_header(bytes: &[u8], signatures: &[String]) -> Result<(BundleHeader, Vec<CatalogSlot>), BundleError> {
    let schema = records::bundle_header()?;
    let mut endian = Endian::Little;
    let mut rec = schema.decode_record(bytes, endian)?;
    if rec.bytes("IsLittleEndian")?.iter().all(|&b| b == 0) {
        debug!("endianness marker is zero; re-reading header as big-endian");
        endian = Endian::Big;
        rec = schema.decode_record(bytes, endian)?;
    }

    let signature = rec.str("Signature")?.to_owned();
    if !signatures.iter().any(|s| *s == signature) {
        return Err(BundleError::format(format!("unexpected bundle signature {signature:?}")));
    }

    let mut endian_marker = [0u8; 12];
    endian_marker.copy_from_slice(rec.bytes("IsLittleEndian")?);

    let mut slots = Vec::new();
    for (i, item) in rec.list("BundleItems")?.iter().enumerate() {
        let item = item.as_record().ok_or_else(|| BundleError::format("malformed catalog slot"))?;
        if let Some(slot) = parse_slot(i, item)? {
            slots.push(slot);
        }
    }

    let header = BundleHeader {
        signature,
        version: rec.str("Version")?.to_owned(),
        time:    rec.f64("Time")?,
        items:   rec.i64("Items")? as i32,
        endian_marker,
        endian,
    };
    Ok((header, slots))
}

fn parse_slot(index: usize, item: &Record) -> Result<Option<CatalogSlot>, BundleError> {
    let ext = item.str("Extension")?;
    if ext.is_empty() {
        return Ok(None);
    }
    let start = item.i64("Start")?;
    let length = item.i64("Length")?;
    let (Ok(start), Ok(length)) = (u64::try_from(start), u64::try_from(length)) else {
        return Err(BundleError::format(format!(
            "catalog slot {index} ({ext}) has negative range {start}+{length}"
        )));
    };
    debug!("catalog slot {index}: {ext} at {start}, {length} B");
    Ok(Some(CatalogSlot { start, length, ext: ext.to_owned() }))
}

// ── Catalog ──────────────────────────────────────────────────────────────────

pub struct CatalogEntry {
    slot:     CatalogSlot,
    loader:   Option<Arc<dyn ItemLoader>>,
    instance: OnceLock<BundleItem>,
    /// Held while the loader runs so it executes once per entry.
    loading:  Mutex<()>,
}

impl CatalogEntry {
    pub fn ext(&self) -> &str {
        &self.slot.ext
    }

    pub fn start(&self) -> u64 {
        self.slot.start
    }

    pub fn length(&self) -> u64 {
        self.slot.length
    }

    pub fn is_loaded(&self) -> bool {
        self.instance.get().is_some()
    }
}

impl fmt::Debug for CatalogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CatalogEntry")
            .field("slot", &self.slot)
            .field("has_loader", &self.loader.is_some())
            .field("loaded", &self.is_loaded())
            .finish()
    }
}

// ── Bundle ───────────────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct Bundle {
    path:    PathBuf,
    header:  BundleHeader,
    catalog: Vec<CatalogEntry>,
}

impl Bundle {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, BundleError> {
        Self::open_with(path, BundleOptions::default())
    }

    pub fn open_with<P: AsRef<Path>>(path: P, opts: BundleOptions) -> Result<Self, BundleError> {
        let path = path.as_ref().to_owned();
        let mut buf = [0u8; BUNDLE_HEADER_SIZE];
        File::open(&path)?.read_exact(&mut buf)?;
        let (header, slots) = parse_header(&buf, &opts.signatures)?;
        debug!(
            "opened {} bundle {:?} ({}), {} catalog entries",
            header.endian, header.version, path.display(), slots.len(),
        );

        let mut catalog: Vec<CatalogEntry> = Vec::with_capacity(slots.len());
        for slot in slots {
            let entry = CatalogEntry {
                loader:   opts.registry.get(&slot.ext),
                instance: OnceLock::new(),
                loading:  Mutex::new(()),
                slot,
            };
            match catalog.iter_mut().find(|e| e.slot.ext == entry.slot.ext) {
                Some(existing) => {
                    warn!("duplicate catalog extension {}; later slot wins", entry.slot.ext);
                    *existing = entry;
                }
                None => catalog.push(entry),
            }
        }
        Ok(Self { path, header, catalog })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn header(&self) -> &BundleHeader {
        &self.header
    }

    pub fn endian(&self) -> Endian {
        self.header.endian
    }

    /// Extensions in slot order.
    pub fn catalog(&self) -> Vec<&str> {
        self.catalog.iter().map(CatalogEntry::ext).collect()
    }

    pub fn entry(&self, ext: &str) -> Option<&CatalogEntry> {
        self.catalog.iter().find(|e| e.slot.ext == ext)
    }

    /// The typed instance for `ext`, built on first call and reused after.
    /// Concurrent first calls wait for a single loader run; a failed load is
    /// not cached and is retried by the next call.
    pub fn get_item(&self, ext: &str) -> Result<&BundleItem, BundleError> {
        let entry = self.entry(ext).ok_or_else(|| BundleError::MissingItem(ext.to_owned()))?;
        if let Some(item) = entry.instance.get() {
            return Ok(item);
        }
        let loader = entry.loader.as_ref().ok_or_else(|| BundleError::NoLoader(ext.to_owned()))?;
        let _guard = entry.loading.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(item) = entry.instance.get() {
            return Ok(item);
        }
        debug!("loading {ext} item at offset {}", entry.slot.start);
        let item = loader.load(&ItemSource {
            path:   &self.path,
            ext:    &entry.slot.ext,
            start:  entry.slot.start,
            length: entry.slot.length,
            endian: self.header.endian,
        })?;
        Ok(entry.instance.get_or_init(|| item))
    }

    pub fn tree(&self) -> Result<&PulsedTree, BundleError> {
        self.get_item(EXT_TREE)?.as_tree().ok_or_else(|| BundleError::ItemType {
            ext:      EXT_TREE.to_owned(),
            expected: "a record tree",
        })
    }

    pub fn sample_data(&self) -> Result<&SampleData, BundleError> {
        self.get_item(EXT_SAMPLES)?.as_samples().ok_or_else(|| BundleError::ItemType {
            ext:      EXT_SAMPLES.to_owned(),
            expected: "sample data",
        })
    }

    pub fn trace_info(&self, group: usize, series: usize, sweep: usize, trace: usize) -> Result<TraceInfo, BundleError> {
        TraceInfo::from_node(self.tree()?.trace(group, series, sweep, trace)?)
    }

    /// Scaled samples of one trace, read fresh from disk.
    pub fn read_samples(&self, group: usize, series: usize, sweep: usize, trace: usize) -> Result<Vec<f64>, BundleError> {
        let info = self.trace_info(group, series, sweep, trace)?;
        self.sample_data()?.read_trace(&info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Value;

    fn header_bytes(endian: Endian, marker: [u8; 12], signature: &str) -> Vec<u8> {
        let slot = |start: i32, length: i32, ext: &str| {
            Value::Record(Record::new().with("Start", start).with("Length", length).with("Extension", ext))
        };
        let mut items = vec![slot(256, 1000, ".pul"), slot(1256, 64, ".dat")];
        items.resize(12, Value::Record(Record::new()));
        let rec = Record::new()
            .with("Signature", signature)
            .with("Version", "v2x90.5")
            .with("Time", 1234.5)
            .with("Items", 2)
            .with("IsLittleEndian", marker.to_vec())
            .with("BundleItems", items);
        records::bundle_header().unwrap().encode_record(&rec, endian).unwrap()
    }

    fn dat2() -> Vec<String> {
        vec![BUNDLE_SIGNATURE.to_owned()]
    }

    #[test]
    fn test_little_endian_header() {
        let mut marker = [0u8; 12];
        marker[0] = 1;
        let (h, slots) = parse_header(&header_bytes(Endian::Little, marker, "DAT2"), &dat2()).unwrap();
        assert_eq!(h.endian, Endian::Little);
        assert_eq!(h.version, "v2x90.5");
        assert_eq!(h.time, 1234.5);
        assert_eq!(h.items, 2);
        assert_eq!(slots.len(), 2);
        assert_eq!(slots[0], CatalogSlot { start: 256, length: 1000, ext: ".pul".into() });
    }

    #[test]
    fn test_zero_marker_rereads_big_endian() {
        let (h, slots) = parse_header(&header_bytes(Endian::Big, [0; 12], "DAT2"), &dat2()).unwrap();
        assert_eq!(h.endian, Endian::Big);
        assert_eq!(h.items, 2);
        assert_eq!(slots[1].start, 1256);
    }

    #[test]
    fn test_bad_signature() {
        let err = parse_header(&header_bytes(Endian::Big, [0; 12], "DAT1"), &dat2()).unwrap_err();
        assert!(matches!(err, BundleError::Format(_)));
        let mut marker = [0u8; 12];
        marker[0] = 1;
        let err = parse_header(&header_bytes(Endian::Little, marker, "XXXX"), &dat2()).unwrap_err();
        assert!(matches!(err, BundleError::Format(_)));
    }

    #[test]
    fn test_registry_defaults() {
        let reg = LoaderRegistry::default();
        assert!(reg.get(EXT_TREE).is_some());
        assert!(reg.get(EXT_SAMPLES).is_some());
        assert!(reg.get(".amp").is_none());
    }
}
