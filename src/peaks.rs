use log::{debug, warn};

use crate::detect::{DetectError, PeakDetector, PeakResult};
use crate::error::PipelineError;
use crate::models::{QueryRangeResponse, SeriesResult};

/// Replaces every sample value in `response` with its detected-peak value.
///
/// Stops at the first series that fails; the response is then left partially
/// rewritten and must be discarded by the caller.
pub fn detect_peaks(
    response: &mut QueryRangeResponse,
    iterations: u32,
    detector: &dyn PeakDetector,
) -> Result<(), PipelineError> {
    if iterations == 0 {
        return Err(PipelineError::ZeroIterations);
    }

    for series in response.data.result.iter_mut() {
        detect_series(series, iterations, detector)?;
    }
    Ok(())
}

fn detect_series(
    series: &mut SeriesResult,
    iterations: u32,
    detector: &dyn PeakDetector,
) -> Result<(), PipelineError> {
    let samples = series
        .values
        .iter()
        .map(|s| parse_value(&s.value))
        .collect::<Result<Vec<f64>, _>>()?;
    if samples.is_empty() {
        return Ok(());
    }

    let len = samples.len();
    let peaks = if iterations == 1 {
        let primary = detector.detect(&samples);
        primary.inflate(len, &primary.baseline())
    } else {
        match detector.iterate(iterations, &samples) {
            Ok(secondary) => secondary.inflate(len, &secondary.primary_baseline()),
            Err(err @ DetectError::NotConverged { .. }) => {
                warn!(
                    kind = "peak detection did not converge",
                    cause:% = err,
                    series:? = series.metric;
                    "falling back to a single detection pass"
                );
                single_pass(detector, &samples)
            }
            Err(err) => return Err(err.into()),
        }
    };
    debug!("replaced {} samples for series {:?}", len, series.metric);

    for (sample, peak) in series.values.iter_mut().zip(peaks) {
        sample.value = format_value(peak);
    }
    Ok(())
}

fn single_pass(detector: &dyn PeakDetector, samples: &[f64]) -> Vec<f64> {
    let result: PeakResult = detector.detect(samples);
    result.inflate(samples.len(), &result.baseline())
}

/// Parses a sample value. Accepts Prometheus' `NaN`, `+Inf` and `-Inf`.
pub fn parse_value(value: &str) -> Result<f64, PipelineError> {
    value.parse::<f64>().map_err(|source| PipelineError::SampleValue {
        value: value.to_string(),
        source,
    })
}

/// Shortest decimal form that parses back to `value`, never in exponent
/// notation.
pub fn format_value(value: f64) -> String {
    if value.is_nan() {
        "NaN".to_string()
    } else if value == f64::INFINITY {
        "+Inf".to_string()
    } else if value == f64::NEG_INFINITY {
        "-Inf".to_string()
    } else {
        value.to_string()
    }
}
