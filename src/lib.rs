//! chroma-index: a compressed store of sorted doc-id sets ("color classes")
//! with differential and meta-differential encodings.
//!
//! Build pipeline:
//! - Sketch: one HyperLogLog sketch per color list, in parallel slices
//! - Cluster: divisive k-means over the sketch registers
//! - Synthesize: a majority-vote reference list per cluster
//! - Encode: each class as a delta-coded symmetric difference against its
//!   cluster's reference
//!
//! The meta layer partitions the doc universe by clustering documents (the
//! transpose of the lists) and re-encodes every class as a sequence of
//! partial colors; the meta-differential layer runs the differential
//! pipeline again, per partition and over the meta lists themselves.

pub mod bits;
pub mod catalog;
pub mod cli;
pub mod differential;
pub mod error;
pub mod formats;
pub mod hybrid;
pub mod index;
pub mod ingest;
pub mod kmeans;
pub mod lock;
pub mod meta;
pub mod meta_differential;
pub mod permute;
pub mod sketch;
pub mod source;

pub use catalog::FilenameCatalog;
pub use differential::{DifferentialColors, DifferentialColorsBuilder};
pub use error::{Error, Result};
pub use hybrid::{HybridColors, HybridColorsBuilder};
pub use index::{ColorStoreKind, Index, IndexBuildConfig};
pub use meta::MetaColors;
pub use meta_differential::MetaDifferentialColors;
pub use source::ColorSource;
