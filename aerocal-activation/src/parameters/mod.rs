//! Activation scenario parameters
//!
//! Parameter structs carry defaults for a sodium chloride mode activating in
//! a saturated parcel, and can be partially overridden from TOML or JSON.

mod aerosol;
mod scenario;

pub use aerosol::AerosolMode;
pub use scenario::{HumidityPartition, Scenario};
