//! Selection of the reference (I0) spectrum a record is analysed against.

use crate::domain::{DoasError, DoasResult, Spectrum};
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::sync::Arc;

/// Where the reference of a fit came from.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ReferenceSource {
    Fixed,
    Record { index: usize },
    Averaged { indices: Vec<usize> },
    /// The window fits the record directly, without a reference.
    None,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SelectedReference {
    pub spectrum: Arc<Spectrum>,
    pub source: ReferenceSource,
}

/// Strategy choosing the reference of `record` among `candidates` (the
/// records of the current batch). `position` is the index of `record` in
/// `candidates` when it is one of them.
pub trait ReferenceSelector: Send + Sync + Debug {
    fn select(
        &self,
        record: &Spectrum,
        position: Option<usize>,
        candidates: &[Arc<Spectrum>],
    ) -> DoasResult<SelectedReference>;
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ReferencePolicy {
    /// A single reference spectrum supplied with the project.
    #[default]
    Fixed,
    /// The lowest-SZA record of the batch; that record itself fits to zero.
    MinimumSza,
    /// The other record with the closest SZA.
    NearestSza,
    #[serde(rename_all = "camelCase")]
    AveragedSza { min_sza: f64, max_sza: f64 },
    /// The other record with the closest timestamp.
    NearestTime,
}

impl ReferencePolicy {
    pub fn build(&self, fixed: Option<Arc<Spectrum>>) -> DoasResult<Box<dyn ReferenceSelector>> {
        let selector: Box<dyn ReferenceSelector> = match self {
            Self::Fixed => {
                let spectrum = fixed.ok_or_else(|| {
                    DoasError::input_validation(
                        "REFERENCE.FIXED",
                        "fixed reference policy requires a reference spectrum",
                    )
                })?;
                Box::new(FixedReference { spectrum })
            }
            Self::MinimumSza => Box::new(MinimumSza),
            Self::NearestSza => Box::new(NearestSza),
            Self::AveragedSza { min_sza, max_sza } => {
                if min_sza.is_nan() || max_sza.is_nan() || min_sza > max_sza {
                    return Err(DoasError::input_validation(
                        "REFERENCE.AVERAGED_SZA",
                        format!("SZA interval [{min_sza}, {max_sza}] is empty"),
                    ));
                }
                Box::new(AveragedSza {
                    min_sza: *min_sza,
                    max_sza: *max_sza,
                })
            }
            Self::NearestTime => Box::new(NearestTime),
        };
        Ok(selector)
    }
}

#[derive(Debug, Clone)]
pub struct FixedReference {
    pub spectrum: Arc<Spectrum>,
}

impl ReferenceSelector for FixedReference {
    fn select(
        &self,
        _record: &Spectrum,
        _position: Option<usize>,
        _candidates: &[Arc<Spectrum>],
    ) -> DoasResult<SelectedReference> {
        Ok(SelectedReference {
            spectrum: Arc::clone(&self.spectrum),
            source: ReferenceSource::Fixed,
        })
    }
}

fn no_candidate(operation: &'static str, reason: &str) -> DoasError {
    DoasError::input_validation(operation, format!("no reference candidate {reason}"))
}

fn pick(candidates: &[Arc<Spectrum>], index: usize) -> SelectedReference {
    SelectedReference {
        spectrum: Arc::clone(&candidates[index]),
        source: ReferenceSource::Record { index },
    }
}

/// Index of the candidate minimizing `key`, skipping candidates without one
/// and the one at `excluded`.
fn arg_min(
    candidates: &[Arc<Spectrum>],
    excluded: Option<usize>,
    key: impl Fn(&Spectrum) -> Option<f64>,
) -> Option<usize> {
    candidates
        .iter()
        .enumerate()
        .filter(|(index, _)| Some(*index) != excluded)
        .filter_map(|(index, candidate)| key(candidate.as_ref()).map(|value| (index, value)))
        .filter(|(_, value)| value.is_finite())
        .min_by(|(_, a), (_, b)| a.total_cmp(b))
        .map(|(index, _)| index)
}

/// The candidate with the lowest solar zenith angle (local noon).
#[derive(Debug, Clone, Copy)]
pub struct MinimumSza;

impl ReferenceSelector for MinimumSza {
    fn select(
        &self,
        _record: &Spectrum,
        _position: Option<usize>,
        candidates: &[Arc<Spectrum>],
    ) -> DoasResult<SelectedReference> {
        arg_min(candidates, None, |candidate| candidate.metadata().solar_zenith_angle)
            .map(|index| pick(candidates, index))
            .ok_or_else(|| no_candidate("REFERENCE.MINIMUM_SZA", "has a solar zenith angle"))
    }
}

/// The record itself is never its own nearest reference.
#[derive(Debug, Clone, Copy)]
pub struct NearestSza;

impl ReferenceSelector for NearestSza {
    fn select(
        &self,
        record: &Spectrum,
        position: Option<usize>,
        candidates: &[Arc<Spectrum>],
    ) -> DoasResult<SelectedReference> {
        let target = record.metadata().solar_zenith_angle.ok_or_else(|| {
            DoasError::input_validation(
                "REFERENCE.NEAREST_SZA",
                "record has no solar zenith angle",
            )
        })?;
        arg_min(candidates, position, |candidate| {
            candidate
                .metadata()
                .solar_zenith_angle
                .map(|sza| (sza - target).abs())
        })
        .map(|index| pick(candidates, index))
        .ok_or_else(|| no_candidate("REFERENCE.NEAREST_SZA", "other than the record has a solar zenith angle"))
    }
}

#[derive(Debug, Clone, Copy)]
pub struct NearestTime;

impl ReferenceSelector for NearestTime {
    fn select(
        &self,
        record: &Spectrum,
        position: Option<usize>,
        candidates: &[Arc<Spectrum>],
    ) -> DoasResult<SelectedReference> {
        let target = record.metadata().timestamp.ok_or_else(|| {
            DoasError::input_validation("REFERENCE.NEAREST_TIME", "record has no timestamp")
        })?;
        arg_min(candidates, position, |candidate| {
            candidate
                .metadata()
                .timestamp
                .map(|time| (time - target).abs())
        })
        .map(|index| pick(candidates, index))
        .ok_or_else(|| no_candidate("REFERENCE.NEAREST_TIME", "other than the record has a timestamp"))
    }
}

/// Pixel-wise mean of every candidate whose SZA lies in `[min_sza, max_sza]`.
#[derive(Debug, Clone, Copy)]
pub struct AveragedSza {
    pub min_sza: f64,
    pub max_sza: f64,
}

impl ReferenceSelector for AveragedSza {
    fn select(
        &self,
        _record: &Spectrum,
        _position: Option<usize>,
        candidates: &[Arc<Spectrum>],
    ) -> DoasResult<SelectedReference> {
        let indices: Vec<usize> = candidates
            .iter()
            .enumerate()
            .filter(|(_, candidate)| {
                candidate
                    .metadata()
                    .solar_zenith_angle
                    .is_some_and(|sza| sza >= self.min_sza && sza <= self.max_sza)
            })
            .map(|(index, _)| index)
            .collect();
        let Some(&first) = indices.first() else {
            return Err(no_candidate(
                "REFERENCE.AVERAGED_SZA",
                &format!("in SZA interval [{}, {}]", self.min_sza, self.max_sza),
            ));
        };

        let length = candidates[first].len();
        let mut signal = vec![0.0; length];
        for &index in &indices {
            let candidate = &candidates[index];
            if candidate.len() != length {
                return Err(DoasError::input_validation(
                    "REFERENCE.AVERAGED_SZA",
                    format!(
                        "candidate {index} has {} pixels, expected {length}",
                        candidate.len()
                    ),
                ));
            }
            for (sum, value) in signal.iter_mut().zip(candidate.signal()) {
                *sum += value;
            }
        }
        let count = indices.len() as f64;
        for value in &mut signal {
            *value /= count;
        }

        let mut average = Spectrum::new(signal)?.with_metadata(*candidates[first].metadata());
        if let Some(wavelengths) = candidates[first].wavelengths() {
            average = average.with_wavelengths(wavelengths.to_vec())?;
        }
        Ok(SelectedReference {
            spectrum: Arc::new(average),
            source: ReferenceSource::Averaged { indices },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{ReferencePolicy, ReferenceSource};
    use crate::domain::{DoasErrorCategory, Spectrum, SpectrumMetadata};
    use std::sync::Arc;

    fn record(level: f64, sza: Option<f64>, timestamp: Option<f64>) -> Spectrum {
        Spectrum::new(vec![level; 4])
            .expect("valid signal")
            .with_metadata(SpectrumMetadata {
                timestamp,
                solar_zenith_angle: sza,
                integration_time: None,
            })
    }

    fn day() -> Vec<Arc<Spectrum>> {
        vec![
            record(1.0, Some(80.0), Some(0.0)),
            record(2.0, Some(40.0), Some(3600.0)),
            record(3.0, Some(35.0), Some(7200.0)),
            record(4.0, None, Some(10800.0)),
            record(5.0, Some(70.0), Some(14400.0)),
        ]
        .into_iter()
        .map(Arc::new)
        .collect()
    }

    #[test]
    fn minimum_sza_picks_local_noon() {
        let candidates = day();
        let selector = ReferencePolicy::MinimumSza.build(None).expect("no fixed needed");
        let selected = selector
            .select(&candidates[0], Some(0), &candidates)
            .expect("candidate exists");
        assert_eq!(selected.source, ReferenceSource::Record { index: 2 });
        assert!(Arc::ptr_eq(&selected.spectrum, &candidates[2]));
    }

    #[test]
    fn nearest_strategies_follow_the_record() {
        let candidates = day();
        let probe = record(0.0, Some(72.0), Some(11000.0));

        let by_sza = ReferencePolicy::NearestSza.build(None).expect("valid policy");
        assert_eq!(
            by_sza.select(&probe, None, &candidates).expect("candidate exists").source,
            ReferenceSource::Record { index: 4 }
        );

        let by_time = ReferencePolicy::NearestTime.build(None).expect("valid policy");
        assert_eq!(
            by_time.select(&probe, None, &candidates).expect("candidate exists").source,
            ReferenceSource::Record { index: 3 }
        );

        let error = by_sza
            .select(&record(0.0, None, None), None, &candidates)
            .expect_err("record without SZA should fail");
        assert_eq!(error.category(), DoasErrorCategory::InputValidation);
    }

    #[test]
    fn nearest_strategies_skip_the_record_itself() {
        let candidates = day();

        let by_sza = ReferencePolicy::NearestSza.build(None).expect("valid policy");
        let selected = by_sza
            .select(&candidates[4], Some(4), &candidates)
            .expect("another candidate exists");
        assert_eq!(selected.source, ReferenceSource::Record { index: 0 });

        let by_time = ReferencePolicy::NearestTime.build(None).expect("valid policy");
        let selected = by_time
            .select(&candidates[2], Some(2), &candidates)
            .expect("another candidate exists");
        assert!(matches!(
            selected.source,
            ReferenceSource::Record { index: 1 } | ReferenceSource::Record { index: 3 }
        ));

        let alone = vec![Arc::clone(&candidates[0])];
        let error = by_sza
            .select(&alone[0], Some(0), &alone)
            .expect_err("a lone record has no other reference");
        assert_eq!(error.category(), DoasErrorCategory::InputValidation);
    }

    #[test]
    fn averaged_sza_means_the_selected_records() {
        let candidates = day();
        let selector = ReferencePolicy::AveragedSza {
            min_sza: 30.0,
            max_sza: 45.0,
        }
        .build(None)
        .expect("valid interval");
        let selected = selector
            .select(&candidates[0], Some(0), &candidates)
            .expect("candidates exist");
        assert_eq!(selected.source, ReferenceSource::Averaged { indices: vec![1, 2] });
        assert_eq!(selected.spectrum.signal(), &[2.5, 2.5, 2.5, 2.5]);

        let empty = ReferencePolicy::AveragedSza {
            min_sza: 10.0,
            max_sza: 20.0,
        }
        .build(None)
        .expect("valid interval");
        assert!(empty.select(&candidates[0], Some(0), &candidates).is_err());
    }

    #[test]
    fn fixed_policy_needs_a_spectrum() {
        assert!(ReferencePolicy::Fixed.build(None).is_err());
        let reference = Arc::new(record(9.0, None, None));
        let selector = ReferencePolicy::Fixed
            .build(Some(Arc::clone(&reference)))
            .expect("spectrum supplied");
        let selected = selector.select(&day()[0], None, &[]).expect("always available");
        assert!(Arc::ptr_eq(&selected.spectrum, &reference));
        assert_eq!(selected.source, ReferenceSource::Fixed);
    }

    #[test]
    fn policy_deserializes_from_json() {
        let policy: ReferencePolicy =
            serde_json::from_str(r#"{"averagedSza": {"minSza": 20.0, "maxSza": 40.0}}"#)
                .expect("valid policy");
        assert_eq!(
            policy,
            ReferencePolicy::AveragedSza {
                min_sza: 20.0,
                max_sza: 40.0
            }
        );
        let policy: ReferencePolicy = serde_json::from_str(r#""minimumSza""#).expect("valid");
        assert_eq!(policy, ReferencePolicy::MinimumSza);
    }
}
