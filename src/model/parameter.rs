use crate::error::ModelError;
use crate::expr::Expr;
use crate::model::container::{Named, TableRow};
use crate::units::Unit;
use std::fs;
use std::path::Path;

/// Symbol denoting time in time-dependent parameter expressions.
pub const TIME_SYMBOL: &str = "t";

/// How a time-dependent parameter obtains its value.
#[derive(Debug, Clone, PartialEq)]
pub enum TimeDependence {
    /// `value = f(t)`.
    SymExpr(Expr),
    /// `value = (P(t) - P(t - dt)) / dt`, the average of `P'` over the last step.
    Preintegrated(Expr),
    /// Linear interpolation of `(t, value)` samples, averaged over the last step when `dt > 0`.
    Sampled {
        samples: Vec<(f64, f64)>,
        /// Cumulative trapezoid integral of the samples, on the same time points.
        preintegrated: Vec<(f64, f64)>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    pub name: String,
    pub value: f64,
    pub unit: Unit,
    pub notes: String,
    pub group: String,
    time_dependence: Option<TimeDependence>,
}

impl Parameter {
    pub fn new(name: impl Into<String>, value: f64, unit: &str) -> Result<Self, ModelError> {
        let name = name.into();
        if !value.is_finite() {
            return Err(ModelError::InvalidParameter {
                name,
                reason: format!("value {} is not finite", value),
            });
        }
        Ok(Self {
            name,
            value,
            unit: Unit::parse(unit)?,
            notes: String::new(),
            group: String::new(),
            time_dependence: None,
        })
    }

    /// A parameter given by an expression in `t`.
    ///
    /// With `preintegrated`, the expression is an antiderivative and the parameter takes the
    /// average rate over each time step.
    pub fn from_expr(name: impl Into<String>, expr: &str, unit: &str, preintegrated: bool) -> Result<Self, ModelError> {
        let name = name.into();
        let expr = Expr::parse(expr).map_err(|err| ModelError::InvalidParameter {
            name: name.clone(),
            reason: err.to_string(),
        })?;
        if let Some(symbol) = expr.free_symbols().into_iter().find(|s| s != TIME_SYMBOL) {
            return Err(ModelError::InvalidParameter {
                name,
                reason: format!("time-dependent expression may only depend on `{}`, found `{}`", TIME_SYMBOL, symbol),
            });
        }
        let dependence = if preintegrated {
            TimeDependence::Preintegrated(expr)
        } else {
            TimeDependence::SymExpr(expr)
        };
        let mut parameter = Self::new(name, 0.0, unit)?.with_time_dependence(dependence);
        parameter.update_time(0.0, 0.0)?;
        Ok(parameter)
    }

    /// A parameter sampled at the given `(t, value)` points, which must be sorted by time.
    pub fn from_samples(name: impl Into<String>, samples: Vec<(f64, f64)>, unit: &str) -> Result<Self, ModelError> {
        let name = name.into();
        if samples.is_empty() {
            return Err(ModelError::InvalidParameter {
                name,
                reason: "no samples".to_string(),
            });
        }
        if samples.windows(2).any(|w| w[1].0 <= w[0].0) {
            return Err(ModelError::InvalidParameter {
                name,
                reason: "sample times must be strictly increasing".to_string(),
            });
        }
        let preintegrated = cumulative_trapezoid(&samples);
        let dependence = TimeDependence::Sampled { samples, preintegrated };
        let mut parameter = Self::new(name, 0.0, unit)?.with_time_dependence(dependence);
        parameter.update_time(0.0, 0.0)?;
        Ok(parameter)
    }

    /// Reads two-column `t, value` samples from a CSV file.
    pub fn from_csv_file(name: impl Into<String>, path: impl AsRef<Path>, unit: &str) -> Result<Self, ModelError> {
        let name = name.into();
        let path = path.as_ref();
        let invalid = |reason: String| ModelError::InvalidParameter {
            name: name.clone(),
            reason,
        };
        let content =
            fs::read_to_string(path).map_err(|err| invalid(format!("can not read {}: {}", path.display(), err)))?;
        let samples = parse_samples(&content).map_err(invalid)?;
        Self::from_samples(name.clone(), samples, unit)
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = notes.into();
        self
    }

    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = group.into();
        self
    }

    fn with_time_dependence(mut self, dependence: TimeDependence) -> Self {
        self.time_dependence = Some(dependence);
        self
    }

    pub fn is_time_dependent(&self) -> bool {
        self.time_dependence.is_some()
    }

    pub fn time_dependence(&self) -> Option<&TimeDependence> {
        self.time_dependence.as_ref()
    }

    /// Updates the value of a time-dependent parameter for a step ending at `t` with size `dt`.
    ///
    /// Constant parameters are left untouched.
    pub fn update_time(&mut self, t: f64, dt: f64) -> Result<(), ModelError> {
        let value = match &self.time_dependence {
            None => return Ok(()),
            Some(TimeDependence::SymExpr(expr)) => self.eval_in_time(expr, t)?,
            Some(TimeDependence::Preintegrated(expr)) => {
                if dt > 0.0 {
                    (self.eval_in_time(expr, t)? - self.eval_in_time(expr, t - dt)?) / dt
                } else {
                    self.eval_in_time(&expr.diff(TIME_SYMBOL), t)?
                }
            }
            Some(TimeDependence::Sampled { samples, preintegrated }) => {
                if dt > 0.0 {
                    (interpolate(preintegrated, t) - interpolate(preintegrated, t - dt)) / dt
                } else {
                    interpolate(samples, t)
                }
            }
        };
        if !value.is_finite() {
            return Err(ModelError::InvalidParameter {
                name: self.name.clone(),
                reason: format!("evaluates to {} at t = {}", value, t),
            });
        }
        self.value = value;
        Ok(())
    }

    fn eval_in_time(&self, expr: &Expr, t: f64) -> Result<f64, ModelError> {
        expr.eval(&|s: &str| (s == TIME_SYMBOL).then_some(t))
            .map_err(|err| ModelError::InvalidParameter {
                name: self.name.clone(),
                reason: err.to_string(),
            })
    }
}

impl Named for Parameter {
    fn name(&self) -> &str {
        &self.name
    }
}

impl TableRow for Parameter {
    fn headers() -> Vec<&'static str> {
        vec!["name", "value", "unit", "is_time_dependent", "notes", "group"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.name.clone(),
            format!("{}", self.value),
            self.unit.to_string(),
            self.is_time_dependent().to_string(),
            self.notes.clone(),
            self.group.clone(),
        ]
    }
}

fn parse_samples(content: &str) -> Result<Vec<(f64, f64)>, String> {
    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty() && !line.trim_start().starts_with('#'))
        .map(|(number, line)| {
            let fields: Vec<&str> = line.split(',').map(str::trim).collect();
            let parse = |s: &str| {
                s.parse::<f64>()
                    .map_err(|_| format!("line {}: `{}` is not a number", number + 1, s))
            };
            match fields.as_slice() {
                [t, value] => Ok((parse(t)?, parse(value)?)),
                _ => Err(format!("line {}: expected two columns", number + 1)),
            }
        })
        .collect()
}

/// Piecewise linear interpolation, constant extrapolation outside the sampled range.
fn interpolate(samples: &[(f64, f64)], t: f64) -> f64 {
    let position = samples.partition_point(|(ti, _)| *ti <= t);
    match position {
        0 => samples[0].1,
        n if n == samples.len() => samples[n - 1].1,
        n => {
            let (t0, v0) = samples[n - 1];
            let (t1, v1) = samples[n];
            v0 + (v1 - v0) * (t - t0) / (t1 - t0)
        }
    }
}

fn cumulative_trapezoid(samples: &[(f64, f64)]) -> Vec<(f64, f64)> {
    let mut integral = 0.0;
    let mut result = Vec::with_capacity(samples.len());
    result.push((samples[0].0, 0.0));
    for w in samples.windows(2) {
        let ((t0, v0), (t1, v1)) = (w[0], w[1]);
        integral += 0.5 * (v0 + v1) * (t1 - t0);
        result.push((t1, integral));
    }
    result
}
