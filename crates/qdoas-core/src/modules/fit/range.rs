use crate::common::WavelengthInterval;

/// Inclusive pixel interval `[start, end]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelInterval {
    pub start: usize,
    pub end: usize,
}

impl PixelInterval {
    pub const fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub const fn pixel_count(&self) -> usize {
        self.end - self.start + 1
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RangeError {
    #[error("spectral range selects no pixel")]
    Empty,
    #[error("pixel interval [{start}, {end}] is inverted")]
    InvertedInterval { start: usize, end: usize },
    #[error("pixel interval {index} overlaps or precedes the previous one")]
    Unordered { index: usize },
    #[error("pixel {pixel} is beyond the detector size {size}")]
    OutOfBounds { pixel: usize, size: usize },
    #[error("wavelength grid must be strictly increasing, broken at pixel {index}")]
    NonIncreasingGrid { index: usize },
}

/// Ascending, non-overlapping pixel intervals selecting the fitted points.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpectralRange {
    intervals: Vec<PixelInterval>,
    size: usize,
}

impl SpectralRange {
    pub fn new(intervals: Vec<PixelInterval>, detector_size: usize) -> Result<Self, RangeError> {
        if intervals.is_empty() {
            return Err(RangeError::Empty);
        }
        for (index, interval) in intervals.iter().enumerate() {
            if interval.start > interval.end {
                return Err(RangeError::InvertedInterval {
                    start: interval.start,
                    end: interval.end,
                });
            }
            if interval.end >= detector_size {
                return Err(RangeError::OutOfBounds {
                    pixel: interval.end,
                    size: detector_size,
                });
            }
            if index > 0 && interval.start <= intervals[index - 1].end {
                return Err(RangeError::Unordered { index });
            }
        }
        let size = intervals.iter().map(PixelInterval::pixel_count).sum();
        Ok(Self { intervals, size })
    }

    pub fn full(detector_size: usize) -> Result<Self, RangeError> {
        if detector_size == 0 {
            return Err(RangeError::Empty);
        }
        Self::new(vec![PixelInterval::new(0, detector_size - 1)], detector_size)
    }

    /// Pixels of `grid` inside any of `windows` and outside every gap.
    pub fn from_wavelength_windows(
        grid: &[f64],
        windows: &[WavelengthInterval],
        gaps: &[WavelengthInterval],
    ) -> Result<Self, RangeError> {
        if let Some(index) = crate::numerics::first_non_increasing(grid) {
            return Err(RangeError::NonIncreasingGrid { index });
        }

        let mut intervals = Vec::new();
        let mut open: Option<usize> = None;
        for (pixel, wavelength) in grid.iter().enumerate() {
            let selected = windows.iter().any(|window| window.contains(*wavelength))
                && !gaps.iter().any(|gap| gap.contains(*wavelength));
            match (selected, open) {
                (true, None) => open = Some(pixel),
                (false, Some(start)) => {
                    intervals.push(PixelInterval::new(start, pixel - 1));
                    open = None;
                }
                _ => {}
            }
        }
        if let Some(start) = open {
            intervals.push(PixelInterval::new(start, grid.len() - 1));
        }

        Self::new(intervals, grid.len())
    }

    pub fn intervals(&self) -> &[PixelInterval] {
        &self.intervals
    }

    /// Number of selected points (`dim_l`).
    pub fn len(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    pub fn first_pixel(&self) -> usize {
        self.intervals[0].start
    }

    pub fn last_pixel(&self) -> usize {
        self.intervals[self.intervals.len() - 1].end
    }

    pub fn contains(&self, pixel: usize) -> bool {
        self.intervals
            .iter()
            .any(|interval| pixel >= interval.start && pixel <= interval.end)
    }

    pub fn pixels(&self) -> impl Iterator<Item = usize> + '_ {
        self.intervals
            .iter()
            .flat_map(|interval| interval.start..=interval.end)
    }

    /// Values of `full` at the selected pixels.
    pub fn restrict(&self, full: &[f64]) -> Vec<f64> {
        self.pixels().map(|pixel| full[pixel]).collect()
    }

    /// Split values laid out like [`restrict`](Self::restrict) output into
    /// one slice per contiguous interval.
    pub fn segments<'a>(&self, restricted: &'a [f64]) -> Vec<&'a [f64]> {
        let mut rest = restricted;
        self.intervals
            .iter()
            .map(|interval| {
                let (segment, tail) = rest.split_at(interval.pixel_count().min(rest.len()));
                rest = tail;
                segment
            })
            .collect()
    }
}
