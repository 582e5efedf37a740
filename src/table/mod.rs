pub mod annotate;
pub mod merge;
pub mod parse;
pub mod types;
pub mod write;

pub use annotate::{annotate, build_metadata, pct_change, AnnotatedTable, DerivedColumn, Sidecar};
pub use merge::{merge, MergeError};
pub use types::{Cell, ColumnInfo, Frequency, MergedTable, Observation, Series, SeriesMeta};
pub use write::{write_csv, write_parquet, write_sidecar};
