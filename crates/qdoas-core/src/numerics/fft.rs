use num_complex::Complex64;
use rustfft::FftPlanner;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum FftError {
    #[error("FFT length must be a non-zero power of two, got {length}")]
    NotPowerOfTwo { length: usize },
    #[error("convolution kernel length {kernel} does not match signal length {signal}")]
    LengthMismatch { signal: usize, kernel: usize },
}

fn check_length(length: usize) -> Result<(), FftError> {
    if length == 0 || !length.is_power_of_two() {
        return Err(FftError::NotPowerOfTwo { length });
    }
    Ok(())
}

/// In-place forward transform (`exp(-2 pi i k n / N)` kernel, no scaling).
pub fn fft_forward(buffer: &mut [Complex64]) -> Result<(), FftError> {
    check_length(buffer.len())?;
    let mut planner = FftPlanner::<f64>::new();
    planner.plan_fft_forward(buffer.len()).process(buffer);
    Ok(())
}

/// In-place inverse transform, scaled by `1/N` so that it undoes [`fft_forward`].
pub fn fft_inverse(buffer: &mut [Complex64]) -> Result<(), FftError> {
    check_length(buffer.len())?;
    let mut planner = FftPlanner::<f64>::new();
    planner.plan_fft_inverse(buffer.len()).process(buffer);
    let scale = 1.0 / buffer.len() as f64;
    for value in buffer.iter_mut() {
        *value *= scale;
    }
    Ok(())
}

pub fn real_fft(signal: &[f64]) -> Result<Vec<Complex64>, FftError> {
    let mut buffer: Vec<Complex64> = signal
        .iter()
        .map(|value| Complex64::new(*value, 0.0))
        .collect();
    fft_forward(&mut buffer)?;
    Ok(buffer)
}

/// Circular convolution of two equal, power-of-two length real sequences.
pub fn circular_convolution(signal: &[f64], kernel: &[f64]) -> Result<Vec<f64>, FftError> {
    check_length(signal.len())?;
    if kernel.len() != signal.len() {
        return Err(FftError::LengthMismatch {
            signal: signal.len(),
            kernel: kernel.len(),
        });
    }

    let mut spectrum = real_fft(signal)?;
    let kernel_spectrum = real_fft(kernel)?;
    for (value, weight) in spectrum.iter_mut().zip(&kernel_spectrum) {
        *value *= *weight;
    }
    fft_inverse(&mut spectrum)?;
    Ok(spectrum.iter().map(|value| value.re).collect())
}

pub fn next_power_of_two(length: usize) -> usize {
    length.max(1).next_power_of_two()
}
