//! # ltt-hist
//!
//! Histogram value type and the histogram store contract used by the
//! template staging step.
//!
//! ## Example
//!
//! ```no_run
//! use ltt_hist::{HistogramPath, HistogramSource, JsonStore};
//!
//! let store = JsonStore::new("inputs");
//! let path: HistogramPath = "UL17/muo/nominal/TTbar.json:Pass_pt_300to400/mass".parse().unwrap();
//! if let Some(h) = store.read(&path).unwrap() {
//!     println!("bins: {}, integral: {}", h.n_bins(), h.integral());
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod histogram;
pub mod path;
pub mod store;

pub use histogram::{Histogram, envelope};
pub use path::HistogramPath;
pub use store::{HistogramDocument, HistogramSink, HistogramSource, JsonStore, MemoryStore};
