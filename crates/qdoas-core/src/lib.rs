//! DOAS spectral analysis engine: numeric primitives, wavelength calibration
//! against a solar reference, and the non-linear least-squares fit of trace
//! gas cross-sections.

pub mod common;
pub mod domain;
pub mod modules;
pub mod numerics;
