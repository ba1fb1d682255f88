//! Walker population control: split/merge primitives, selection and
//! subgrouping policies, recycling and the per-iteration driver.

pub mod driver;
pub mod primitives;
pub mod recycle;
pub mod registry;
pub mod selection;
pub mod subgroup;
pub mod types;

pub use driver::{IterationReport, MAX_THRESHOLD_PIECES, WeDriver, bin_seed};
pub use primitives::{is_close, merge_walkers, split_multiplicity, split_walker};
pub use recycle::{InitialState, InitialStatePool, RecycleRecord, SinkRegion, VecPool};
pub use registry::{PolicyRegistry, SelectionFactory, SubgroupFactory};
pub use selection::{
    PairedSelection, Selection, SelectionKind, SelectionParams, SelectionPolicy, WeightSelection,
};
pub use subgroup::{ClusterSubgroups, LineageSubgroups, SubgroupPolicy, TrivialSubgroups};
pub use types::{Bin, IdSource, Parent, Segment, SegmentId, SegmentStore, WtgParents};
