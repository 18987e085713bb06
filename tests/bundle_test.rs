use pmbundle::bundle::{ItemSource, TreeLoader};
use pmbundle::schema::records::{self, *};
use pmbundle::{
    Bundle, BundleError, BundleItem, BundleOptions, Endian, ItemLoader, Level, LoaderRegistry,
    PulsedTree, Record, TreeNode, Value,
};
use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::NamedTempFile;

const NOMINAL: [usize; 5] = [
    ROOT_RECORD_SIZE, GROUP_RECORD_SIZE, SERIES_RECORD_SIZE, SWEEP_RECORD_SIZE, TRACE_RECORD_SIZE,
];

const DATA_OFFSET: i32 = 256;
const RAW: [i16; 3] = [0, 100, -50];

fn node(level: Level, label: &str) -> TreeNode {
    TreeNode::new(level, Record::new().with("Label", label))
}

fn trace(label: &str, format: u8) -> TreeNode {
    TreeNode::new(
        Level::Trace,
        Record::new()
            .with("Label", label)
            .with("Data", DATA_OFFSET)
            .with("DataPoints", RAW.len() as i32)
            .with("DataFormat", format)
            .with("DataScaler", 2.0)
            .with("ZeroData", 1.0)
            .with("YUnit", "A")
            .with("XUnit", "s")
            .with("XInterval", 1e-4),
    )
}

/// Root with two groups: the first holds three series (the first of which
/// has one sweep with two traces), the second is empty.
fn sample_tree() -> TreeNode {
    let sweep = node(Level::Sweep, "Sweep1")
        .with_child(trace("Imon", 0))
        .with_child(trace("Broken", 9));
    TreeNode::new(Level::Root, Record::new().with("Version", 9).with("VersionName", "v2x90"))
        .with_child(
            node(Level::Group, "E-1")
                .with_child(node(Level::Series, "IV").with_child(sweep))
                .with_child(node(Level::Series, "Ramp"))
                .with_child(node(Level::Series, "Step")),
        )
        .with_child(node(Level::Group, "E-2"))
}

fn header(endian: Endian, signature: &str, slots: &[(i32, i32, &str)]) -> Vec<u8> {
    let mut items: Vec<Value> = slots
        .iter()
        .map(|&(start, length, ext)| {
            Value::Record(Record::new().with("Start", start).with("Length", length).with("Extension", ext))
        })
        .collect();
    items.resize(BUNDLE_ITEM_COUNT, Value::Record(Record::new()));
    let mut marker = vec![0u8; 12];
    if endian == Endian::Little {
        marker[0] = 1;
    }
    let rec = Record::new()
        .with("Signature", signature)
        .with("Version", "v2x90.5")
        .with("Time", 3.5e9)
        .with("Items", slots.len() as i32)
        .with("IsLittleEndian", marker)
        .with("BundleItems", items);
    records::bundle_header().unwrap().encode_record(&rec, endian).unwrap()
}

fn write_bundle(endian: Endian, signature: &str) -> NamedTempFile {
    let samples: Vec<u8> = RAW
        .iter()
        .flat_map(|v| match endian {
            Endian::Little => v.to_le_bytes(),
            Endian::Big    => v.to_be_bytes(),
        })
        .collect();
    let tree = PulsedTree::new(endian, NOMINAL.to_vec(), sample_tree()).to_bytes().unwrap();
    let tree_start = DATA_OFFSET + samples.len() as i32;

    let mut file = NamedTempFile::new().unwrap();
    file.write_all(&header(endian, signature, &[
        (0, tree_start + tree.len() as i32, ".dat"),
        (tree_start, tree.len() as i32, ".pul"),
    ]))
    .unwrap();
    file.write_all(&samples).unwrap();
    file.write_all(&tree).unwrap();
    file.flush().unwrap();
    file
}

#[test]
fn test_open_and_catalog() {
    let file = write_bundle(Endian::Little, "DAT2");
    let bundle = Bundle::open(file.path()).unwrap();
    assert_eq!(bundle.endian(), Endian::Little);
    assert_eq!(bundle.catalog(), vec![".dat", ".pul"]);
    assert_eq!(bundle.header().version, "v2x90.5");
    assert_eq!(bundle.entry(".pul").unwrap().start(), 262);
    assert!(!bundle.entry(".pul").unwrap().is_loaded());
}

#[test]
fn test_tree_shape() {
    let file = write_bundle(Endian::Little, "DAT2");
    let bundle = Bundle::open(file.path()).unwrap();
    let root = bundle.tree().unwrap().root();
    assert_eq!(root.level(), Level::Root);
    assert_eq!(root.children().len(), 2);
    assert_eq!(root.children()[0].children().len(), 3);
    assert_eq!(root.children()[1].children().len(), 0);
    assert_eq!(root.field("Version"), Some(&Value::Int(9)));
    let imon = &root.children()[0].children()[0].children()[0].children()[0];
    assert_eq!(imon.level(), Level::Trace);
    assert_eq!(imon.label(), "Imon");
}

#[test]
fn test_get_item_is_cached() {
    let file = write_bundle(Endian::Little, "DAT2");
    let bundle = Bundle::open(file.path()).unwrap();
    let first = bundle.get_item(".pul").unwrap();
    let second = bundle.get_item(".pul").unwrap();
    assert!(std::ptr::eq(first, second));
    assert!(bundle.entry(".pul").unwrap().is_loaded());
}

struct CountingLoader(Arc<AtomicUsize>);

impl ItemLoader for CountingLoader {
    fn load(&self, source: &ItemSource<'_>) -> Result<BundleItem, BundleError> {
        self.0.fetch_add(1, Ordering::SeqCst);
        // widen the window for racing first calls
        std::thread::sleep(Duration::from_millis(20));
        TreeLoader.load(source)
    }
}

#[test]
fn test_loader_runs_once() {
    let file = write_bundle(Endian::Big, "DAT2");
    let calls = Arc::new(AtomicUsize::new(0));
    let mut opts = BundleOptions::default();
    opts.registry.register(".pul", CountingLoader(Arc::clone(&calls)));

    let bundle = Bundle::open_with(file.path(), opts).unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    bundle.get_item(".pul").unwrap();
    bundle.get_item(".pul").unwrap();
    bundle.read_samples(0, 0, 0, 0).unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn test_concurrent_first_calls_load_once() {
    let file = write_bundle(Endian::Little, "DAT2");
    let calls = Arc::new(AtomicUsize::new(0));
    let mut opts = BundleOptions::default();
    opts.registry.register(".pul", CountingLoader(Arc::clone(&calls)));
    let bundle = &Bundle::open_with(file.path(), opts).unwrap();

    let trees: Vec<usize> = std::thread::scope(|s| {
        let handles: Vec<_> = (0..8)
            .map(|_| s.spawn(move || bundle.tree().unwrap() as *const PulsedTree as usize))
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(trees.iter().all(|&p| p == trees[0]));
}

/// Summarises the bulk-data region instead of opening it.
struct RegionLoader;

impl ItemLoader for RegionLoader {
    fn load(&self, source: &ItemSource<'_>) -> Result<BundleItem, BundleError> {
        Ok(BundleItem::Other(Box::new((source.start, source.length))))
    }
}

#[test]
fn test_custom_loader_item() {
    let file = write_bundle(Endian::Little, "DAT2");
    let mut opts = BundleOptions::default();
    opts.registry.register(".dat", RegionLoader);
    let bundle = Bundle::open_with(file.path(), opts).unwrap();

    let item = bundle.get_item(".dat").unwrap();
    let &(start, length) = item.downcast_ref::<(u64, u64)>().unwrap();
    assert_eq!(start, 0);
    assert_eq!(length, bundle.entry(".dat").unwrap().length());
    assert!(item.downcast_ref::<String>().is_none());
    assert!(item.as_samples().is_none());
    assert!(matches!(bundle.read_samples(0, 0, 0, 0), Err(BundleError::ItemType { .. })));
}

#[test]
fn test_read_samples_scales_raw_values() {
    for endian in [Endian::Little, Endian::Big] {
        let file = write_bundle(endian, "DAT2");
        let bundle = Bundle::open(file.path()).unwrap();
        assert_eq!(bundle.endian(), endian);
        assert_eq!(bundle.read_samples(0, 0, 0, 0).unwrap(), vec![1.0, 201.0, -99.0]);
        // fresh read each time
        assert_eq!(bundle.read_samples(0, 0, 0, 0).unwrap(), vec![1.0, 201.0, -99.0]);
    }
}

#[test]
fn test_out_of_range_index() {
    let file = write_bundle(Endian::Little, "DAT2");
    let bundle = Bundle::open(file.path()).unwrap();
    let err = bundle.read_samples(1, 0, 0, 0).unwrap_err();
    assert!(matches!(err, BundleError::Index { level: Level::Series, index: 0, len: 0 }));
    let err = bundle.read_samples(0, 0, 0, 2).unwrap_err();
    assert!(matches!(err, BundleError::Index { level: Level::Trace, index: 2, len: 2 }));
}

#[test]
fn test_unknown_sample_format() {
    let file = write_bundle(Endian::Little, "DAT2");
    let bundle = Bundle::open(file.path()).unwrap();
    assert!(matches!(bundle.read_samples(0, 0, 0, 1), Err(BundleError::Format(_))));
}

#[test]
fn test_bad_signature_is_format_error() {
    for endian in [Endian::Little, Endian::Big] {
        let file = write_bundle(endian, "NOPE");
        assert!(matches!(Bundle::open(file.path()), Err(BundleError::Format(_))));
    }
}

#[test]
fn test_custom_signature_option() {
    let file = write_bundle(Endian::Little, "DAT3");
    let opts = BundleOptions { signatures: vec!["DAT3".into()], ..BundleOptions::default() };
    assert!(Bundle::open_with(file.path(), opts).is_ok());
}

#[test]
fn test_oversized_trace_is_io_error() {
    let samples: Vec<u8> = vec![0; 64];
    let huge = TreeNode::new(Level::Trace, trace("Huge", 1).record().clone().with("DataPoints", i32::MAX));
    let root = TreeNode::new(Level::Root, Record::new()).with_child(
        node(Level::Group, "G").with_child(node(Level::Series, "S").with_child(node(Level::Sweep, "W").with_child(huge))),
    );
    let tree = PulsedTree::new(Endian::Little, NOMINAL.to_vec(), root).to_bytes().unwrap();
    let tree_start = DATA_OFFSET + samples.len() as i32;

    let mut file = NamedTempFile::new().unwrap();
    file.write_all(&header(Endian::Little, "DAT2", &[
        (0, tree_start + tree.len() as i32, ".dat"),
        (tree_start, tree.len() as i32, ".pul"),
    ]))
    .unwrap();
    file.write_all(&samples).unwrap();
    file.write_all(&tree).unwrap();
    file.flush().unwrap();

    let bundle = Bundle::open(file.path()).unwrap();
    assert_eq!(bundle.trace_info(0, 0, 0, 0).unwrap().data_points, i32::MAX as usize);
    assert!(matches!(bundle.read_samples(0, 0, 0, 0), Err(BundleError::Io(_))));
}

#[test]
fn test_short_file_is_io_error() {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(b"DAT2\0\0\0\0").unwrap();
    file.flush().unwrap();
    assert!(matches!(Bundle::open(file.path()), Err(BundleError::Io(_))));
}

#[test]
fn test_missing_item_and_missing_loader() {
    let file = write_bundle(Endian::Little, "DAT2");
    let bundle = Bundle::open(file.path()).unwrap();
    assert!(matches!(bundle.get_item(".amp"), Err(BundleError::MissingItem(_))));

    let opts = BundleOptions { registry: LoaderRegistry::empty(), ..BundleOptions::default() };
    let bundle = Bundle::open_with(file.path(), opts).unwrap();
    assert!(matches!(bundle.get_item(".pul"), Err(BundleError::NoLoader(_))));
}

#[test]
fn test_trace_info() {
    let file = write_bundle(Endian::Big, "DAT2");
    let bundle = Bundle::open(file.path()).unwrap();
    let info = bundle.trace_info(0, 0, 0, 0).unwrap();
    assert_eq!(info.label, "Imon");
    assert_eq!(info.y_unit, "A");
    assert_eq!(info.data_offset, DATA_OFFSET as u64);
    assert_eq!(info.time_axis().len(), 3);
}
