//! Weighted-ensemble resampling: bin mapping plus weight-conserving
//! split/merge population control.

pub mod config;
pub mod error;
pub mod io;
pub mod mapping;
pub mod population;
pub mod runtime;
pub mod sim;

pub use config::{AdjustOrder, DriverConfig};
pub use error::{AssignmentError, Diagnostic, Diagnostics, Result, WeError};
pub use mapping::BinMapper;
pub use population::{IterationReport, Segment, SegmentId, SegmentStore, WeDriver};
