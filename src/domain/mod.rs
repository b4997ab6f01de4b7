//! Domain layer: the ports the reconciler depends on.

pub mod ports;

pub use ports::{ClusterPairRegistry, RuleExecutor, RulePhase, TerminationSignal, VolumeDriver};
