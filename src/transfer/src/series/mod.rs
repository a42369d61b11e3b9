//! Series persistence: the per-database series key log and the per-shard
//! TSI index segment writer.

pub mod index;
pub mod series_file;

pub use series_file::SeriesFile;
