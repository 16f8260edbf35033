//! Physical constants (SI units)

/// Molar mass of water (kg/mol)
pub const MOLAR_MASS_WATER: f64 = 0.01801528;

/// Density of liquid water (kg/m³)
pub const DENSITY_WATER: f64 = 1000.0;
