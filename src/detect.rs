use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum DetectError {
    #[error("peak detection did not converge: pass {pass} found no peaks")]
    NotConverged { pass: u32 },

    #[error("invalid pass count: {0}")]
    InvalidPassCount(u32),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Peak {
    pub index: usize,
    pub value: f64,
}

pub trait PeakDetector: Send + Sync {
    /// Runs a single detection pass over `samples`.
    fn detect(&self, samples: &[f64]) -> PeakResult;

    /// Runs `passes` detection passes, each one over the peaks of the pass
    /// before it.
    fn iterate(&self, passes: u32, samples: &[f64]) -> Result<PeakResult, DetectError>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct PeakResult {
    input: Vec<f64>,
    peaks: Vec<Peak>,
    primary: Vec<Peak>,
}

impl PeakResult {
    fn single(input: &[f64], peaks: Vec<Peak>) -> Self {
        Self {
            input: input.to_vec(),
            primary: peaks.clone(),
            peaks,
        }
    }

    #[cfg(test)]
    pub fn peaks(&self) -> &[Peak] {
        &self.peaks
    }

    /// Expands the result to `len` values. Peak positions carry the peak
    /// value, every other position comes from `baseline` (NaN past its end).
    pub fn inflate(&self, len: usize, baseline: &[f64]) -> Vec<f64> {
        let mut dense: Vec<f64> = (0..len)
            .map(|i| baseline.get(i).copied().unwrap_or(f64::NAN))
            .collect();
        for peak in &self.peaks {
            if let Some(slot) = dense.get_mut(peak.index) {
                *slot = peak.value;
            }
        }
        dense
    }

    /// Envelope of this result's own peaks: linear between neighbouring
    /// peaks, held flat past either end. The input when there are none.
    pub fn baseline(&self) -> Vec<f64> {
        envelope(&self.input, &self.peaks)
    }

    /// Envelope of the first-pass peaks.
    pub fn primary_baseline(&self) -> Vec<f64> {
        envelope(&self.input, &self.primary)
    }
}

fn envelope(input: &[f64], peaks: &[Peak]) -> Vec<f64> {
    let (first, last) = match (peaks.first(), peaks.last()) {
        (Some(first), Some(last)) => (first, last),
        _ => return input.to_vec(),
    };

    let mut dense = vec![first.value; input.len()];
    for pair in peaks.windows(2) {
        let (a, b) = (pair[0], pair[1]);
        let span = (b.index - a.index) as f64;
        for i in a.index..b.index.min(dense.len()) {
            dense[i] = a.value + (b.value - a.value) * (i - a.index) as f64 / span;
        }
    }
    for peak in peaks {
        if let Some(slot) = dense.get_mut(peak.index) {
            *slot = peak.value;
        }
    }
    for v in dense.iter_mut().skip(last.index + 1) {
        *v = last.value;
    }
    dense
}

/// Plateau-aware local maximum detector.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalMaxima;

impl LocalMaxima {
    fn find(values: &[f64]) -> Vec<usize> {
        let n = values.len();
        let mut found = Vec::new();
        let mut start = 0;
        while start < n {
            let v = values[start];
            let mut end = start;
            while end + 1 < n && values[end + 1] == v {
                end += 1;
            }

            let rises = start == 0 || values[start - 1] < v;
            let falls = end == n - 1 || values[end + 1] < v;
            let bounded = n == 1 || start > 0 || end < n - 1;
            if rises && falls && bounded && !v.is_nan() {
                found.push(start);
            }
            start = end + 1;
        }
        found
    }
}

impl PeakDetector for LocalMaxima {
    fn detect(&self, samples: &[f64]) -> PeakResult {
        let peaks = Self::find(samples)
            .into_iter()
            .map(|index| Peak {
                index,
                value: samples[index],
            })
            .collect();
        PeakResult::single(samples, peaks)
    }

    fn iterate(&self, passes: u32, samples: &[f64]) -> Result<PeakResult, DetectError> {
        if passes == 0 {
            return Err(DetectError::InvalidPassCount(passes));
        }

        let mut result = self.detect(samples);
        if result.peaks.is_empty() {
            return Err(DetectError::NotConverged { pass: 1 });
        }

        for pass in 2..=passes {
            let values: Vec<f64> = result.peaks.iter().map(|p| p.value).collect();
            let next: Vec<Peak> = Self::find(&values)
                .into_iter()
                .map(|i| result.peaks[i])
                .collect();
            if next.is_empty() {
                return Err(DetectError::NotConverged { pass });
            }
            let settled = next.len() == result.peaks.len();
            result.peaks = next;
            if settled {
                break;
            }
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn indices(result: &PeakResult) -> Vec<usize> {
        result.peaks().iter().map(|p| p.index).collect()
    }

    #[test]
    fn test_single_peak() {
        let result = LocalMaxima.detect(&[1.0, 5.0, 2.0]);
        assert_eq!(result.peaks(), &[Peak { index: 1, value: 5.0 }]);
        assert_eq!(result.inflate(3, &result.baseline()), vec![5.0, 5.0, 5.0]);
    }

    #[test]
    fn test_edges_and_plateaus() {
        assert_eq!(indices(&LocalMaxima.detect(&[3.0, 1.0, 2.0])), vec![0, 2]);
        assert_eq!(indices(&LocalMaxima.detect(&[1.0, 5.0, 5.0, 2.0])), vec![1]);
        assert_eq!(indices(&LocalMaxima.detect(&[1.0, 3.0, 3.0, 4.0])), vec![3]);
        assert_eq!(indices(&LocalMaxima.detect(&[7.0])), vec![0]);
        assert!(LocalMaxima.detect(&[2.0, 2.0, 2.0]).peaks().is_empty());
        assert!(LocalMaxima.detect(&[]).peaks().is_empty());
    }

    #[test]
    fn test_nan_is_never_a_peak() {
        assert_eq!(indices(&LocalMaxima.detect(&[1.0, f64::NAN, 1.0, 3.0, 1.0])), vec![3]);
        assert!(LocalMaxima.detect(&[f64::NAN]).peaks().is_empty());
    }

    #[test]
    fn test_baseline_without_peaks_is_the_input() {
        let result = LocalMaxima.detect(&[2.0, 2.0, 2.0]);
        assert_eq!(result.inflate(3, &result.baseline()), vec![2.0, 2.0, 2.0]);
    }

    #[test]
    fn test_single_pass_envelope() {
        let samples = [0.0, 4.0, 0.0, 2.0, 0.0, 6.0, 0.0, 1.0, 0.0, 5.0, 0.0];
        let result = LocalMaxima.detect(&samples);
        assert_eq!(indices(&result), vec![1, 3, 5, 7, 9]);
        assert_eq!(
            result.inflate(samples.len(), &result.baseline()),
            vec![4.0, 4.0, 3.0, 2.0, 4.0, 6.0, 3.5, 1.0, 3.0, 5.0, 5.0]
        );
    }

    #[test]
    fn test_iterate_keeps_peaks_of_peaks() {
        let samples = [0.0, 4.0, 0.0, 2.0, 0.0, 6.0, 0.0, 1.0, 0.0, 5.0, 0.0];
        let result = LocalMaxima.iterate(2, &samples).unwrap();
        assert_eq!(indices(&result), vec![1, 5, 9]);
        assert_eq!(
            result.inflate(samples.len(), &result.primary_baseline()),
            vec![4.0, 4.0, 3.0, 2.0, 4.0, 6.0, 3.5, 1.0, 3.0, 5.0, 5.0]
        );
    }

    #[test]
    fn test_inflate_fills_every_non_peak_from_baseline() {
        let samples = [0.0, 4.0, 0.0, 2.0, 0.0, 6.0, 0.0, 1.0, 0.0, 5.0, 0.0];
        let result = LocalMaxima.iterate(2, &samples).unwrap();
        let m = 100.0;
        assert_eq!(
            result.inflate(samples.len(), &[m; 11]),
            vec![m, 4.0, m, m, m, 6.0, m, m, m, 5.0, m]
        );
    }

    #[test]
    fn test_iterate_stops_once_settled() {
        let samples = [1.0, 5.0, 2.0];
        let result = LocalMaxima.iterate(10, &samples).unwrap();
        assert_eq!(indices(&result), vec![1]);
    }

    #[test]
    fn test_iterate_flat_series_does_not_converge() {
        assert_eq!(
            LocalMaxima.iterate(3, &[2.0, 2.0, 2.0]),
            Err(DetectError::NotConverged { pass: 1 })
        );
    }

    #[test]
    fn test_iterate_equal_peaks_do_not_converge() {
        assert_eq!(
            LocalMaxima.iterate(2, &[0.0, 3.0, 0.0, 3.0, 0.0]),
            Err(DetectError::NotConverged { pass: 2 })
        );
    }

    #[test]
    fn test_iterate_rejects_zero_passes() {
        assert_eq!(
            LocalMaxima.iterate(0, &[1.0]),
            Err(DetectError::InvalidPassCount(0))
        );
    }

    #[test]
    fn test_inflate_short_baseline() {
        let result = LocalMaxima.detect(&[1.0, 5.0, 2.0]);
        let dense = result.inflate(3, &[9.0]);
        assert_eq!(dense[0], 9.0);
        assert_eq!(dense[1], 5.0);
        assert!(dense[2].is_nan());
    }
}
