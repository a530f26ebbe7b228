//! Drill count check for generated series

use serde::Serialize;

use groundtruth_common::content::DrillSeries;
use groundtruth_common::error::{GroundTruthError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DrillCountCheck {
    pub expected: usize,
    pub actual: usize,
    pub tolerance: usize,
    pub within_tolerance: bool,
}

impl DrillCountCheck {
    pub fn into_result(self) -> Result<Self> {
        if self.within_tolerance {
            Ok(self)
        } else {
            Err(GroundTruthError::Validation(format!(
                "series has {} drills, expected {} (±{})",
                self.actual, self.expected, self.tolerance
            )))
        }
    }
}

/// Series must hold `expected` drills, give or take `tolerance`
pub fn validate_drill_count(series: &DrillSeries, expected: usize, tolerance: usize) -> DrillCountCheck {
    let actual = series.drill_count();
    DrillCountCheck {
        expected,
        actual,
        tolerance,
        within_tolerance: actual.abs_diff(expected) <= tolerance,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn series_with(n: usize) -> DrillSeries {
        let drills: Vec<_> = (0..n).map(|i| json!({"drillId": format!("d{}", i)})).collect();
        serde_json::from_value(json!({
            "phases": [{"principleGroups": [{"drills": drills}]}]
        }))
        .unwrap()
    }

    #[test]
    fn test_within_tolerance() {
        assert!(validate_drill_count(&series_with(9), 10, 1).within_tolerance);
        assert!(validate_drill_count(&series_with(11), 10, 1).within_tolerance);
    }

    #[test]
    fn test_outside_tolerance_is_validation_error() {
        let check = validate_drill_count(&series_with(7), 10, 1);
        assert!(!check.within_tolerance);
        assert_eq!(check.into_result().unwrap_err().code(), "validation");
    }
}
