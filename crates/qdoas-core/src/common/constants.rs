//! Physical constants of the rotational Raman scattering model used for Ring
//! spectra, and wavelength/wavenumber conversions.
//!
//! Molecular data follow Chance & Spurr (1997); wavenumbers are in cm^-1 and
//! polarizability anisotropies in cm^3.

use std::f64::consts::PI;

/// `hc/k` in cm K.
pub const SECOND_RADIATION_CONSTANT: f64 = 1.438_776_9;
pub const NM_PER_CM_INVERSE: f64 = 1.0e7;
pub const DEFAULT_RING_TEMPERATURE: f64 = 250.0;
/// Highest rotational quantum number summed over.
pub const RAMAN_MAX_J: u32 = 60;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RamanMolecule {
    pub name: &'static str,
    /// Volume mixing ratio in dry air.
    pub fraction: f64,
    pub rotational_constant: f64,
    pub centrifugal_constant: f64,
    pub even_spin_weight: f64,
    pub odd_spin_weight: f64,
    /// `gamma(nu) = a + b / (c - nu^2)`.
    pub anisotropy: [f64; 3],
}

impl RamanMolecule {
    pub fn spin_weight(&self, j: u32) -> f64 {
        if j % 2 == 0 {
            self.even_spin_weight
        } else {
            self.odd_spin_weight
        }
    }

    /// Rotational term energy `F(J)` in cm^-1.
    pub fn term_energy(&self, j: u32) -> f64 {
        let jj = f64::from(j) * f64::from(j + 1);
        self.rotational_constant * jj - self.centrifugal_constant * jj * jj
    }

    pub fn polarizability_anisotropy(&self, wavenumber: f64) -> f64 {
        let [a, b, c] = self.anisotropy;
        a + b / (c - wavenumber * wavenumber)
    }
}

pub const N2: RamanMolecule = RamanMolecule {
    name: "N2",
    fraction: 0.79,
    rotational_constant: 1.989_57,
    centrifugal_constant: 5.76e-6,
    even_spin_weight: 6.0,
    odd_spin_weight: 3.0,
    anisotropy: [-6.014_66e-25, 2.385_57e-14, 1.86e10],
};

pub const O2: RamanMolecule = RamanMolecule {
    name: "O2",
    fraction: 0.21,
    rotational_constant: 1.437_68,
    centrifugal_constant: 4.85e-6,
    even_spin_weight: 0.0,
    odd_spin_weight: 1.0,
    anisotropy: [7.149e-26, 4.593_64e-16, 4.827_16e9],
};

pub const AIR_MOLECULES: [RamanMolecule; 2] = [N2, O2];

/// Prefactor of the rotational Raman cross-section, `256 pi^5 / 27`.
pub fn raman_prefactor() -> f64 {
    256.0 * PI.powi(5) / 27.0
}

pub fn wavelength_to_wavenumber(wavelength_nm: f64) -> f64 {
    NM_PER_CM_INVERSE / wavelength_nm
}

pub fn wavenumber_to_wavelength(wavenumber: f64) -> f64 {
    NM_PER_CM_INVERSE / wavenumber
}

#[cfg(test)]
mod tests {
    use super::{AIR_MOLECULES, N2, O2, wavelength_to_wavenumber, wavenumber_to_wavelength};

    #[test]
    fn air_fractions_sum_to_one() {
        let total: f64 = AIR_MOLECULES.iter().map(|molecule| molecule.fraction).sum();
        assert!((total - 1.0).abs() < 1.0e-12);
    }

    #[test]
    fn oxygen_has_no_even_rotational_levels() {
        assert_eq!(O2.spin_weight(2), 0.0);
        assert_eq!(O2.spin_weight(3), 1.0);
        assert_eq!(N2.spin_weight(0), 6.0);
    }

    #[test]
    fn nitrogen_anisotropy_is_near_tabulated_value() {
        // About 7.1e-25 cm^3 around 400 nm.
        let gamma = N2.polarizability_anisotropy(wavelength_to_wavenumber(400.0));
        assert!(gamma > 6.5e-25 && gamma < 7.5e-25, "{gamma}");
    }

    #[test]
    fn wavenumber_conversion_is_an_involution() {
        let wavelength = 431.7;
        let back = wavenumber_to_wavelength(wavelength_to_wavenumber(wavelength));
        assert!((back - wavelength).abs() < 1.0e-12);
    }
}
