pub mod controller;

pub use controller::run;

mod backoff;
mod reconcilers;
pub use reconcilers::naming::{derive_name, resource_name};
pub use reconcilers::validation::{validate, ReplicaPolicy, ValidationError};
