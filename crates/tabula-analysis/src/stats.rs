//! Descriptive statistics over plain `f64` slices.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{AnalysisError, Result};

/// Single-column summary statistics.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stat {
    Mean,
    Median,
    Min,
    Max,
    StdDev,
}

impl Stat {
    pub fn compute(&self, values: &[f64]) -> Result<f64> {
        match self {
            Stat::Mean => mean(values),
            Stat::Median => median(values),
            Stat::Min => min(values),
            Stat::Max => max(values),
            Stat::StdDev => std_dev(values),
        }
    }
}

impl fmt::Display for Stat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stat::Mean => write!(f, "mean"),
            Stat::Median => write!(f, "median"),
            Stat::Min => write!(f, "min"),
            Stat::Max => write!(f, "max"),
            Stat::StdDev => write!(f, "std_dev"),
        }
    }
}

/// Aggregation applied per group.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggFn {
    #[default]
    Mean,
    Sum,
    Count,
    Min,
    Max,
    Median,
}

impl AggFn {
    pub fn apply(&self, values: &[f64]) -> Result<f64> {
        match self {
            AggFn::Mean => mean(values),
            AggFn::Sum => Ok(values.iter().sum()),
            AggFn::Count => Ok(values.len() as f64),
            AggFn::Min => min(values),
            AggFn::Max => max(values),
            AggFn::Median => median(values),
        }
    }
}

impl fmt::Display for AggFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AggFn::Mean => write!(f, "mean"),
            AggFn::Sum => write!(f, "sum"),
            AggFn::Count => write!(f, "count"),
            AggFn::Min => write!(f, "min"),
            AggFn::Max => write!(f, "max"),
            AggFn::Median => write!(f, "median"),
        }
    }
}

impl std::str::FromStr for AggFn {
    type Err = AnalysisError;
    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mean" | "average" | "avg" => Ok(AggFn::Mean),
            "sum" | "total" => Ok(AggFn::Sum),
            "count" => Ok(AggFn::Count),
            "min" => Ok(AggFn::Min),
            "max" => Ok(AggFn::Max),
            "median" => Ok(AggFn::Median),
            other => Err(AnalysisError::InvalidArgument(format!(
                "invalid aggregation '{}'; use one of: mean, sum, count, min, max, median",
                other
            ))),
        }
    }
}

/// Comparison used by `count_where`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Predicate {
    #[default]
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
}

impl Predicate {
    pub fn is_ordering(&self) -> bool {
        !matches!(self, Predicate::Eq | Predicate::Ne)
    }

    pub fn test_number(&self, lhs: f64, rhs: f64) -> bool {
        match self {
            Predicate::Eq => lhs == rhs,
            Predicate::Ne => lhs != rhs,
            Predicate::Gt => lhs > rhs,
            Predicate::Ge => lhs >= rhs,
            Predicate::Lt => lhs < rhs,
            Predicate::Le => lhs <= rhs,
        }
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Predicate::Eq => write!(f, "eq"),
            Predicate::Ne => write!(f, "ne"),
            Predicate::Gt => write!(f, "gt"),
            Predicate::Ge => write!(f, "ge"),
            Predicate::Lt => write!(f, "lt"),
            Predicate::Le => write!(f, "le"),
        }
    }
}

impl std::str::FromStr for Predicate {
    type Err = AnalysisError;
    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "eq" | "=" | "==" => Ok(Predicate::Eq),
            "ne" | "!=" => Ok(Predicate::Ne),
            "gt" | ">" => Ok(Predicate::Gt),
            "ge" | ">=" => Ok(Predicate::Ge),
            "lt" | "<" => Ok(Predicate::Lt),
            "le" | "<=" => Ok(Predicate::Le),
            other => Err(AnalysisError::InvalidArgument(format!(
                "invalid comparison '{}'; use one of: eq, ne, gt, ge, lt, le",
                other
            ))),
        }
    }
}

// =============================================================================
// Functions
// =============================================================================

fn require(values: &[f64], n: usize, what: &str) -> Result<()> {
    if values.len() < n {
        return Err(AnalysisError::InsufficientData(format!(
            "{} needs at least {} value(s), found {}",
            what,
            n,
            values.len()
        )));
    }
    Ok(())
}

pub fn mean(values: &[f64]) -> Result<f64> {
    require(values, 1, "mean")?;
    Ok(values.iter().sum::<f64>() / values.len() as f64)
}

pub fn median(values: &[f64]) -> Result<f64> {
    require(values, 1, "median")?;
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        Ok((sorted[mid - 1] + sorted[mid]) / 2.0)
    } else {
        Ok(sorted[mid])
    }
}

pub fn min(values: &[f64]) -> Result<f64> {
    require(values, 1, "min")?;
    Ok(values.iter().copied().fold(f64::INFINITY, f64::min))
}

pub fn max(values: &[f64]) -> Result<f64> {
    require(values, 1, "max")?;
    Ok(values.iter().copied().fold(f64::NEG_INFINITY, f64::max))
}

/// Sample standard deviation (n - 1 denominator).
pub fn std_dev(values: &[f64]) -> Result<f64> {
    require(values, 2, "standard deviation")?;
    let m = mean(values)?;
    let var = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    Ok(var.sqrt())
}

/// Pearson correlation over paired observations. `None` when either side
/// has zero variance.
pub fn pearson(pairs: &[(f64, f64)]) -> Result<Option<f64>> {
    if pairs.len() < 2 {
        return Err(AnalysisError::InsufficientData(format!(
            "correlation needs at least 2 paired values, found {}",
            pairs.len()
        )));
    }
    let n = pairs.len() as f64;
    let mx = pairs.iter().map(|p| p.0).sum::<f64>() / n;
    let my = pairs.iter().map(|p| p.1).sum::<f64>() / n;

    let mut cov = 0.0;
    let mut vx = 0.0;
    let mut vy = 0.0;
    for (x, y) in pairs {
        cov += (x - mx) * (y - my);
        vx += (x - mx).powi(2);
        vy += (y - my).powi(2);
    }
    if vx == 0.0 || vy == 0.0 {
        return Ok(None);
    }
    Ok(Some(cov / (vx.sqrt() * vy.sqrt())))
}

/// Absolute z-score of each value; all zero when the spread is zero.
pub fn z_scores(values: &[f64]) -> Result<Vec<f64>> {
    let m = mean(values)?;
    let sd = std_dev(values)?;
    if sd == 0.0 {
        return Ok(vec![0.0; values.len()]);
    }
    Ok(values.iter().map(|v| ((v - m) / sd).abs()).collect())
}

pub fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_mean_and_median() {
        let v = [10.0, 12.0, 15.0, 13.0];
        assert_eq!(mean(&v).unwrap(), 12.5);
        assert_eq!(median(&v).unwrap(), 12.5);
        assert_eq!(median(&[3.0, 1.0, 2.0]).unwrap(), 2.0);
    }

    #[test]
    fn test_min_max() {
        let v = [4.0, -1.0, 9.5];
        assert_eq!(min(&v).unwrap(), -1.0);
        assert_eq!(max(&v).unwrap(), 9.5);
    }

    #[test]
    fn test_std_dev_is_sample() {
        let v = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        let sd = std_dev(&v).unwrap();
        assert!((sd - 2.138).abs() < 1e-3);
    }

    #[test]
    fn test_empty_input_is_insufficient() {
        assert!(matches!(
            mean(&[]).unwrap_err(),
            AnalysisError::InsufficientData(_)
        ));
        assert!(std_dev(&[1.0]).is_err());
    }

    #[test]
    fn test_pearson() {
        let perfect: Vec<(f64, f64)> = (0..5).map(|i| (i as f64, 2.0 * i as f64 + 1.0)).collect();
        assert!((pearson(&perfect).unwrap().unwrap() - 1.0).abs() < 1e-12);

        let inverse: Vec<(f64, f64)> = (0..5).map(|i| (i as f64, -(i as f64))).collect();
        assert!((pearson(&inverse).unwrap().unwrap() + 1.0).abs() < 1e-12);

        let flat = [(1.0, 3.0), (2.0, 3.0), (3.0, 3.0)];
        assert_eq!(pearson(&flat).unwrap(), None);
    }

    #[test]
    fn test_z_scores_flag_extreme_value() {
        let v = [10.0, 11.0, 10.0, 12.0, 11.0, 10.0, 50.0];
        let z = z_scores(&v).unwrap();
        let flagged: Vec<usize> = z
            .iter()
            .enumerate()
            .filter(|(_, s)| **s > 2.0)
            .map(|(i, _)| i)
            .collect();
        assert_eq!(flagged, vec![6]);
    }

    #[test]
    fn test_z_scores_zero_spread() {
        assert_eq!(z_scores(&[5.0, 5.0, 5.0]).unwrap(), vec![0.0; 3]);
    }

    #[test]
    fn test_agg_fn_parse_and_apply() {
        assert_eq!(AggFn::from_str("Average").unwrap(), AggFn::Mean);
        assert!(AggFn::from_str("mode").is_err());
        let v = [1.0, 2.0, 6.0];
        assert_eq!(AggFn::Sum.apply(&v).unwrap(), 9.0);
        assert_eq!(AggFn::Count.apply(&v).unwrap(), 3.0);
        assert_eq!(AggFn::Median.apply(&v).unwrap(), 2.0);
    }

    #[test]
    fn test_predicate_parse() {
        assert_eq!(Predicate::from_str(">=").unwrap(), Predicate::Ge);
        assert_eq!(Predicate::from_str("eq").unwrap(), Predicate::Eq);
        assert!(Predicate::from_str("like").is_err());
        assert!(Predicate::Gt.is_ordering());
        assert!(Predicate::Lt.test_number(1.0, 2.0));
    }

    #[test]
    fn test_round_to() {
        assert_eq!(round_to(0.98765, 3), 0.988);
        assert_eq!(round_to(33.3333, 2), 33.33);
    }
}
