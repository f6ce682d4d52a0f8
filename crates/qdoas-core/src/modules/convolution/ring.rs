use super::{ConvolutionError, SlitFunction, convolve_cross_section, validate_source};
use crate::common::constants::{
    AIR_MOLECULES, RAMAN_MAX_J, RamanMolecule, SECOND_RADIATION_CONSTANT, raman_prefactor,
    wavelength_to_wavenumber, wavenumber_to_wavelength,
};
use crate::numerics::vector_locate;
use serde::Serialize;
use tracing::{debug, warn};

/// One rotational Raman transition of one molecule.
#[derive(Debug, Clone, Copy, PartialEq)]
struct RamanLine {
    /// `nu_in - nu_out` in cm^-1; positive for Stokes (S branch) lines.
    shift: f64,
    /// Mixing ratio x Placzek-Teller coefficient x initial-level population.
    weight: f64,
}

fn level_population_factor(molecule: &RamanMolecule, j: u32, temperature: f64) -> f64 {
    molecule.spin_weight(j)
        * f64::from(2 * j + 1)
        * (-SECOND_RADIATION_CONSTANT * molecule.term_energy(j) / temperature).exp()
}

fn rotational_lines(molecule: &RamanMolecule, temperature: f64) -> Vec<RamanLine> {
    let partition: f64 = (0..=RAMAN_MAX_J)
        .map(|j| level_population_factor(molecule, j, temperature))
        .sum();

    let mut lines = Vec::new();
    for j in 0..=RAMAN_MAX_J {
        let population = level_population_factor(molecule, j, temperature) / partition;
        if population <= 0.0 {
            continue;
        }
        let jf = f64::from(j);

        // S branch, J -> J + 2.
        let placzek_teller = 3.0 * (jf + 1.0) * (jf + 2.0) / (2.0 * (2.0 * jf + 1.0) * (2.0 * jf + 3.0));
        lines.push(RamanLine {
            shift: molecule.term_energy(j + 2) - molecule.term_energy(j),
            weight: molecule.fraction * placzek_teller * population,
        });

        // O branch, J -> J - 2.
        if j >= 2 {
            let placzek_teller = 3.0 * jf * (jf - 1.0) / (2.0 * (2.0 * jf + 1.0) * (2.0 * jf - 1.0));
            lines.push(RamanLine {
                shift: -(molecule.term_energy(j) - molecule.term_energy(j - 2)),
                weight: molecule.fraction * placzek_teller * population,
            });
        }
    }
    lines
}

/// Linear interpolation inside the grid; `None` beyond either end.
fn interpolate_linear(grid: &[f64], values: &[f64], target: f64) -> Option<f64> {
    if target < grid[0] || target > grid[grid.len() - 1] {
        return None;
    }
    let lower = vector_locate(grid, target)?;
    let fraction = (target - grid[lower]) / (grid[lower + 1] - grid[lower]);
    Some(values[lower] + fraction * (values[lower + 1] - values[lower]))
}

/// Raman source plus, per solar pixel, whether one of its incident
/// wavelengths fell outside the solar grid and took the edge intensity.
fn raman_source_with_edges(
    solar_wavelengths: &[f64],
    solar_values: &[f64],
    temperature: f64,
) -> Result<(Vec<f64>, Vec<bool>), ConvolutionError> {
    validate_source(solar_wavelengths, solar_values)?;
    if !temperature.is_finite() || temperature <= 0.0 {
        return Err(ConvolutionError::InvalidTemperature { temperature });
    }

    let prefactor = raman_prefactor();
    let molecules: Vec<(&RamanMolecule, Vec<RamanLine>)> = AIR_MOLECULES
        .iter()
        .map(|molecule| (molecule, rotational_lines(molecule, temperature)))
        .collect();
    debug!(
        temperature,
        lines = molecules.iter().map(|(_, lines)| lines.len()).sum::<usize>(),
        "computing raman source"
    );

    let first = solar_values[0];
    let last = solar_values[solar_values.len() - 1];
    let mut source = Vec::with_capacity(solar_wavelengths.len());
    let mut at_edge = Vec::with_capacity(solar_wavelengths.len());
    for wavelength in solar_wavelengths {
        let scattered = wavelength_to_wavenumber(*wavelength);
        let scattered4 = scattered.powi(4);
        let mut clamped = false;
        let mut total = 0.0;
        for (molecule, line) in molecules
            .iter()
            .flat_map(|(molecule, lines)| lines.iter().map(move |line| (molecule, line)))
        {
            let incident = scattered + line.shift;
            let anisotropy = molecule.polarizability_anisotropy(incident);
            let incident_wavelength = wavenumber_to_wavelength(incident);
            let intensity = interpolate_linear(solar_wavelengths, solar_values, incident_wavelength)
                .unwrap_or_else(|| {
                    clamped = true;
                    if incident_wavelength < solar_wavelengths[0] { first } else { last }
                });
            total += prefactor * scattered4 * anisotropy * anisotropy * line.weight * intensity;
        }
        source.push(total);
        at_edge.push(clamped);
    }
    Ok((source, at_edge))
}

/// Rotationally Raman scattered intensity on the solar grid: the solar
/// spectrum redistributed by every S and O branch line of N2 and O2.
///
/// Light scattered from beyond the solar grid takes the intensity of the
/// nearest edge pixel.
pub fn raman_source(
    solar_wavelengths: &[f64],
    solar_values: &[f64],
    temperature: f64,
) -> Result<Vec<f64>, ConvolutionError> {
    let (source, at_edge) = raman_source_with_edges(solar_wavelengths, solar_values, temperature)?;
    let clamped = at_edge.iter().filter(|flag| **flag).count();
    if clamped > 0 {
        debug!(
            pixels = clamped,
            total = source.len(),
            "raman source pixels used edge-clamped solar intensity"
        );
    }
    Ok(source)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RingSpectrum {
    pub wavelengths: Vec<f64>,
    /// Convolved Raman intensity divided by the convolved solar intensity.
    pub ring: Vec<f64>,
    pub raman: Vec<f64>,
    pub solar: Vec<f64>,
}

/// Ring spectrum on `target_grid` from a high-resolution solar spectrum.
pub fn raman_ring_spectrum(
    solar_wavelengths: &[f64],
    solar_values: &[f64],
    slit: &SlitFunction,
    temperature: f64,
    target_grid: &[f64],
) -> Result<RingSpectrum, ConvolutionError> {
    let (source, at_edge) = raman_source_with_edges(solar_wavelengths, solar_values, temperature)?;
    let raman = convolve_cross_section(solar_wavelengths, &source, slit, target_grid)?;
    let edge_points = edge_affected_points(solar_wavelengths, &at_edge, target_grid);
    if edge_points > 0 {
        warn!(
            points = edge_points,
            "ring points within the raman shift of the solar grid edge rely on clamped intensity"
        );
    }
    let solar = convolve_cross_section(solar_wavelengths, solar_values, slit, target_grid)?;

    let ring = raman
        .iter()
        .zip(&solar)
        .zip(target_grid)
        .map(|((raman, solar), target)| {
            if *solar <= 0.0 {
                Err(ConvolutionError::NonPositiveIntensity { target: *target })
            } else {
                Ok(raman / solar)
            }
        })
        .collect::<Result<Vec<f64>, ConvolutionError>>()?;

    Ok(RingSpectrum {
        wavelengths: target_grid.to_vec(),
        ring,
        raman,
        solar,
    })
}

/// Target points outside the span of solar pixels whose Raman source
/// needed no edge clamping.
fn edge_affected_points(solar_wavelengths: &[f64], at_edge: &[bool], target_grid: &[f64]) -> usize {
    let clean = at_edge
        .iter()
        .position(|flag| !flag)
        .zip(at_edge.iter().rposition(|flag| !flag));
    match clean {
        Some((first, last)) => target_grid
            .iter()
            .filter(|target| **target < solar_wavelengths[first] || **target > solar_wavelengths[last])
            .count(),
        None => target_grid.len(),
    }
}

#[cfg(test)]
mod tests {
    use super::{
        edge_affected_points, raman_ring_spectrum, raman_source, raman_source_with_edges,
        rotational_lines,
    };
    use crate::common::constants::{N2, O2};
    use crate::modules::convolution::{ConvolutionError, SlitFunction};

    fn solar_grid() -> Vec<f64> {
        (0..1501).map(|index| 380.0 + 0.02 * index as f64).collect()
    }

    #[test]
    fn populations_are_normalized() {
        for molecule in [N2, O2] {
            let lines = rotational_lines(&molecule, 250.0);
            // Every S line carries the full level population times a
            // Placzek-Teller factor <= 1, so the weight sum stays below the fraction.
            let total: f64 = lines.iter().map(|line| line.weight).sum();
            assert!(total > 0.0 && total < molecule.fraction, "{}: {total}", molecule.name);
            assert!(lines.iter().all(|line| line.shift != 0.0));
        }
    }

    #[test]
    fn flat_sun_gives_a_smooth_decreasing_source() {
        let wavelengths = solar_grid();
        let solar = vec![1.0; wavelengths.len()];
        let source = raman_source(&wavelengths, &solar, 250.0).expect("valid input");
        assert!(source.iter().all(|value| value.is_finite() && *value > 0.0));
        assert!(source[0] > source[source.len() - 1]);
    }

    #[test]
    fn fraunhofer_line_is_filled_in() {
        let wavelengths = solar_grid();
        let solar: Vec<f64> = wavelengths
            .iter()
            .map(|wavelength| 1.0 - 0.5 * (-((wavelength - 395.0) / 0.1).powi(2)).exp())
            .collect();
        let slit = SlitFunction::Gaussian { fwhm: 0.5 };
        let ring = raman_ring_spectrum(&wavelengths, &solar, &slit, 250.0, &[392.0, 395.0, 398.0])
            .expect("valid input");

        assert_eq!(ring.wavelengths, vec![392.0, 395.0, 398.0]);
        assert!(ring.ring[1] > 1.05 * ring.ring[0], "{:?}", ring.ring);
        assert!(ring.ring[1] > 1.05 * ring.ring[2], "{:?}", ring.ring);
    }

    #[test]
    fn edge_clamping_is_confined_to_the_raman_shift_margin() {
        let wavelengths = solar_grid();
        let solar = vec![1.0; wavelengths.len()];
        let (source, at_edge) =
            raman_source_with_edges(&wavelengths, &solar, 250.0).expect("valid input");
        assert_eq!(source.len(), at_edge.len());
        assert!(at_edge[0] && at_edge[at_edge.len() - 1]);
        assert!(!at_edge[750], "395 nm is far from both edges");

        let first_clean = at_edge.iter().position(|flag| !flag).expect("clean pixels exist");
        let margin = wavelengths[first_clean] - wavelengths[0];
        assert!(margin > 1.0 && margin < 10.0, "margin = {margin}");

        assert_eq!(edge_affected_points(&wavelengths, &at_edge, &[380.5, 395.0, 409.5]), 2);
        assert_eq!(edge_affected_points(&wavelengths, &at_edge, &[392.0, 398.0]), 0);
    }

    #[test]
    fn non_positive_temperature_is_rejected() {
        let wavelengths = solar_grid();
        let solar = vec![1.0; wavelengths.len()];
        assert_eq!(
            raman_source(&wavelengths, &solar, 0.0),
            Err(ConvolutionError::InvalidTemperature { temperature: 0.0 })
        );
    }
}
