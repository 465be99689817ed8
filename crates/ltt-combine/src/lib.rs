//! # ltt-combine
//!
//! Bookkeeping for the legacy top-tagging scale-factor fits with Combine:
//!
//! - [`catalog`]: taggers, working points, intervals, systematics, processes
//! - [`task`]: run configuration, resolved against a catalog before any I/O
//! - [`enumerate`]: channels, processes and POIs with prime-factor ids
//! - [`stage`]: rebinned, clipped templates under the fitter's naming scheme
//! - [`datacard`]: the Combine datacard
//! - [`combine`] / [`runner`]: the Combine command chain and its execution
//! - [`results`]: scale factors from the regular and frozen fits
//!
//! ## Example
//!
//! ```no_run
//! use ltt_combine::catalog::{Catalog, MergeSplit, WorkingPointKey};
//! use ltt_combine::enumerate::CategoryEnumerator;
//! use ltt_combine::task::FitTaskConfig;
//! use ltt_core::Period;
//!
//! let catalog = Catalog::standard().unwrap();
//! let task = FitTaskConfig::new(
//!     "hotvr_t__tau",
//!     WorkingPointKey::Name("Standard".into()),
//!     &[Period::Ul17, Period::Ul18],
//!     MergeSplit::Top3,
//! )
//! .resolve(&catalog)
//! .unwrap();
//! let enumeration = CategoryEnumerator::new().enumerate(&task).unwrap();
//! println!("{} channels", enumeration.channels.len());
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::too_many_arguments)]

pub mod catalog;
pub mod combine;
pub mod datacard;
pub mod enumerate;
pub mod nuisance;
pub mod results;
pub mod runner;
pub mod stage;
pub mod task;

pub use catalog::Catalog;
pub use combine::{CombineCommands, ExternalCommand};
pub use datacard::DatacardWriter;
pub use enumerate::{CategoryEnumerator, Enumeration};
pub use results::{Extraction, FitOutput, ResultExtractor, ScaleFactor};
pub use runner::{JobOutcome, run_chain, run_commands};
pub use stage::{StagingReport, TemplateStager};
pub use task::{FitTask, FitTaskConfig, ObservationMode};
