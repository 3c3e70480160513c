//! Custom resources read and written by the operator.
//!
//! `NodePool` is the only resource this operator defines; the rest mirror the subset of
//! the HyperShift, Cluster API and Cluster API Provider AWS schemas that the controller touches.

pub mod awsmachinetemplates;
pub mod hostedclusters;
pub mod machineconfigservers;
pub mod machinedeployments;
pub mod machinehealthchecks;
pub mod nodepools;
