pub mod experiment;
pub mod session;

pub use experiment::{
    AudienceRule, Experiment, ExperimentResults, ExperimentStatus, MetricComparison, Variation,
};
pub use session::{Device, DeviceType, Location, Session};
