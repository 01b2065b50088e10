//! Pipeline construction: one optional binding per source kind, unioned into
//! a single event stream for the cycle.

pub mod aggregate;
pub mod binding;
pub mod factory;

pub use aggregate::{attach_pipelines, Aggregation};
pub use binding::{PipelineBinding, PulledEvents, UnifiedEventStream};
pub use factory::PipelineFactory;
