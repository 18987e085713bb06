pub mod error;
pub mod schema;
pub mod tree;
pub mod bundle;
pub mod samples;

pub use error::BundleError;
pub use schema::{Endian, Record, RecordSchema, Value};
pub use tree::{Level, PulsedTree, TreeNode};
pub use bundle::{Bundle, BundleHeader, BundleItem, BundleOptions, ItemLoader, LoaderRegistry};
pub use samples::{SampleData, SampleFormat, TraceInfo};
