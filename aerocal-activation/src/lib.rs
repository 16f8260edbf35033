//! Aerosol activation scenarios for calibration
//!
//! Describes the conditions of a rising, saturated air parcel and the aerosol
//! mode activating in it, and wraps an activation parameterisation as a
//! [`aerocal_core::ForwardModel`] whose parameters are selected aerosol
//! properties.
//!
//! The activation physics itself is supplied by the caller through the
//! [`ActivationPhysics`] trait.

pub mod constants;
pub mod errors;
pub mod model;
pub mod parameters;

pub use errors::{ActivationError, ActivationResult};
pub use model::{ActivatedAerosol, ActivationForwardModel, ActivationPhysics, ModeParameter};
pub use parameters::{AerosolMode, HumidityPartition, Scenario};
