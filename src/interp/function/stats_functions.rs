use indexmap::IndexMap;

use super::math_functions::invert;
use super::Builtin;
use crate::interp::ast::{BinOp, Expr};
use crate::interp::dataframe::DataFrame;
use crate::interp::{TError, Value};

/// Pull the numeric contents of a vector, honoring `na_rm`: with it NAs are
/// skipped, without it they raise the NA TypeError.
fn collect_numeric(v: &Value, name: &str, na_rm: bool) -> Result<Vec<f64>, TError> {
    let items = match v {
        Value::Vector(items) => items.as_slice(),
        Value::NDArray(a) => return Ok(a.data.clone()),
        v => {
            return Err(TError::type_error(format!(
                "`{name}` expects a numeric vector, got {}",
                v.kind()
            )))
        }
    };
    let mut out = Vec::with_capacity(items.len());
    for item in items {
        match item {
            Value::Na(_) => {
                if !na_rm {
                    return Err(TError::na_operand(format!(
                        "`{name}` encountered NA value; use na_rm = true"
                    )));
                }
            }
            item => out.push(item.get_float()?),
        }
    }
    Ok(out)
}

/// As `collect_numeric` but keeps the Int/Float distinction for `sum`,
/// `min` and `max`.
fn collect_values(v: &Value, name: &str, na_rm: bool) -> Result<Vec<Value>, TError> {
    let items = match v {
        Value::Vector(items) => items.as_slice(),
        v => {
            return Err(TError::type_error(format!(
                "`{name}` expects a vector, got {}",
                v.kind()
            )))
        }
    };
    let mut out = Vec::with_capacity(items.len());
    for item in items {
        match item {
            Value::Na(_) => {
                if !na_rm {
                    return Err(TError::na_operand(format!(
                        "`{name}` encountered NA value; use na_rm = true"
                    )));
                }
            }
            item => out.push(item.clone()),
        }
    }
    Ok(out)
}

fn na_rm_builtin(
    name: &'static str,
    doc: &'static str,
    f: impl Fn(&Value, bool) -> Value + 'static,
) -> Builtin {
    Builtin::new(name, 1, Some(1), doc, move |_, _, site| {
        match site.named_bool("na_rm", false) {
            Ok(na_rm) => f(site.arg(0), na_rm),
            Err(e) => Value::error(e),
        }
    })
    .named(&["na_rm"])
}

pub fn builtins() -> Vec<Builtin> {
    vec![
        na_rm_builtin("mean", "Arithmetic mean of a numeric vector.", |v, na_rm| {
            match collect_numeric(v, "mean", na_rm) {
                Ok(xs) => Value::Float(xs.iter().sum::<f64>() / xs.len() as f64),
                Err(e) => Value::error(e),
            }
        }),
        na_rm_builtin("median", "Median of a numeric vector.", |v, na_rm| {
            match collect_numeric(v, "median", na_rm) {
                Ok(mut xs) => {
                    if xs.is_empty() {
                        return Value::Float(f64::NAN);
                    }
                    xs.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
                    let mid = xs.len() / 2;
                    if xs.len() % 2 == 1 {
                        Value::Float(xs[mid])
                    } else {
                        Value::Float((xs[mid - 1] + xs[mid]) / 2.0)
                    }
                }
                Err(e) => Value::error(e),
            }
        }),
        na_rm_builtin("sum", "Sum; sequential left-to-right fold.", |v, na_rm| {
            match collect_values(v, "sum", na_rm) {
                Ok(values) => {
                    let mut total = 0.0;
                    let mut all_int = true;
                    for value in &values {
                        match value {
                            Value::Int(n) => total += *n as f64,
                            Value::Float(x) => {
                                all_int = false;
                                total += x;
                            }
                            v => {
                                return Value::error(TError::type_error(format!(
                                    "`sum` expects numbers, got {}",
                                    v.kind()
                                )))
                            }
                        }
                    }
                    if all_int {
                        Value::Int(total as i64)
                    } else {
                        Value::Float(total)
                    }
                }
                Err(e) => Value::error(e),
            }
        }),
        na_rm_builtin("min", "Smallest element.", |v, na_rm| extremum(v, na_rm, true)),
        na_rm_builtin("max", "Largest element.", |v, na_rm| extremum(v, na_rm, false)),
        na_rm_builtin("var", "Sample variance (n - 1 denominator).", |v, na_rm| {
            match collect_numeric(v, "var", na_rm) {
                Ok(xs) => variance(&xs).into(),
                Err(e) => Value::error(e),
            }
        }),
        na_rm_builtin("sd", "Sample standard deviation.", |v, na_rm| {
            match collect_numeric(v, "sd", na_rm) {
                Ok(xs) => variance(&xs).map(f64::sqrt).into(),
                Err(e) => Value::error(e),
            }
        }),
        Builtin::new("quantile", 2, Some(2), "Linear-interpolation quantile (type 7).", |_, _, site| {
            let na_rm = match site.named_bool("na_rm", false) {
                Ok(b) => b,
                Err(e) => return Value::error(e),
            };
            let p = match site.arg(1).get_float() {
                Ok(p) => p,
                Err(e) => return Value::error(e),
            };
            if !(0.0..=1.0).contains(&p) {
                return Value::error(TError::value_error(format!(
                    "`quantile` probability must be in [0, 1], got {p}"
                )));
            }
            match collect_numeric(site.arg(0), "quantile", na_rm) {
                Ok(mut xs) => {
                    if xs.is_empty() {
                        return Value::error(TError::value_error(
                            "`quantile` of an empty vector",
                        ));
                    }
                    xs.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
                    let h = (xs.len() - 1) as f64 * p;
                    let lo = h.floor() as usize;
                    let hi = h.ceil() as usize;
                    Value::Float(xs[lo] + (h - lo as f64) * (xs[hi] - xs[lo]))
                }
                Err(e) => Value::error(e),
            }
        })
        .named(&["na_rm"]),
        Builtin::new("cor", 2, Some(2), "Pearson correlation of two numeric vectors.", |_, _, site| {
            let na_rm = match site.named_bool("na_rm", false) {
                Ok(b) => b,
                Err(e) => return Value::error(e),
            };
            let xs = match collect_numeric(site.arg(0), "cor", na_rm) {
                Ok(v) => v,
                Err(e) => return Value::error(e),
            };
            let ys = match collect_numeric(site.arg(1), "cor", na_rm) {
                Ok(v) => v,
                Err(e) => return Value::error(e),
            };
            if xs.len() != ys.len() {
                return Value::error(TError::value_error(format!(
                    "`cor` vectors have different lengths: {} vs {}",
                    xs.len(),
                    ys.len()
                )));
            }
            if xs.len() < 2 {
                return Value::error(TError::value_error(
                    "`cor` needs at least two observations",
                ));
            }
            let mx = xs.iter().sum::<f64>() / xs.len() as f64;
            let my = ys.iter().sum::<f64>() / ys.len() as f64;
            let mut sxy = 0.0;
            let mut sxx = 0.0;
            let mut syy = 0.0;
            for (x, y) in xs.iter().zip(&ys) {
                sxy += (x - mx) * (y - my);
                sxx += (x - mx) * (x - mx);
                syy += (y - my) * (y - my);
            }
            Value::Float(sxy / (sxx * syy).sqrt())
        })
        .named(&["na_rm"]),
        Builtin::new("lm", 2, Some(2), "Ordinary least squares for `y ~ x1 + ...`.", |_, _, site| {
            let formula = match site.arg(0) {
                Value::Formula(f) => f.clone(),
                v => {
                    return Value::error(TError::type_error(format!(
                        "`lm` expects a formula, got {}",
                        v.kind()
                    )))
                }
            };
            let df = match site.arg(1) {
                Value::DataFrame(df) => df.clone(),
                v => {
                    return Value::error(TError::type_error(format!(
                        "`lm` expects a dataframe, got {}",
                        v.kind()
                    )))
                }
            };
            match fit_lm(&formula.lhs, &formula.rhs, &df) {
                Ok(v) => v,
                Err(e) => Value::error(e),
            }
        }),
    ]
}

fn extremum(v: &Value, na_rm: bool, minimum: bool) -> Value {
    let name = if minimum { "min" } else { "max" };
    match collect_values(v, name, na_rm) {
        Ok(values) => {
            let mut best: Option<Value> = None;
            for value in values {
                best = Some(match best {
                    None => value,
                    Some(b) => match value.try_cmp(&b) {
                        Some(ord) if (minimum && ord.is_lt()) || (!minimum && ord.is_gt()) => {
                            value
                        }
                        Some(_) => b,
                        None => {
                            return Value::error(TError::type_error(format!(
                                "`{name}` expects comparable elements"
                            )))
                        }
                    },
                });
            }
            match best {
                Some(v) => v,
                None => Value::error(TError::value_error(format!(
                    "`{name}` of an empty vector"
                ))),
            }
        }
        Err(e) => Value::error(e),
    }
}

fn variance(xs: &[f64]) -> Result<f64, TError> {
    if xs.len() < 2 {
        return Err(TError::value_error(
            "variance needs at least two observations",
        ));
    }
    let mean = xs.iter().sum::<f64>() / xs.len() as f64;
    let ss = xs.iter().map(|x| (x - mean) * (x - mean)).sum::<f64>();
    Ok(ss / (xs.len() - 1) as f64)
}

/// Predictor columns named on the right-hand side: a single identifier or a
/// `+`-sum of identifiers.
fn rhs_terms(expr: &Expr, out: &mut Vec<String>) -> Result<(), TError> {
    match expr {
        Expr::Ident(name) => {
            out.push(name.clone());
            Ok(())
        }
        Expr::Binary(BinOp::Add, l, r) => {
            rhs_terms(l, out)?;
            rhs_terms(r, out)
        }
        e => Err(TError::value_error(format!(
            "`lm` formula terms must be column names, got `{}`",
            e.deparse()
        ))),
    }
}

fn column_floats(df: &DataFrame, name: &str) -> Result<Vec<f64>, TError> {
    let col = df
        .table
        .column(name)
        .ok_or_else(|| TError::key_error(format!("column `{name}` not found")))?;
    col.float_buffer().ok_or_else(|| {
        TError::type_error(format!(
            "`lm` requires numeric column `{name}` without NA values"
        ))
    })
}

fn fit_lm(lhs: &Expr, rhs: &Expr, df: &DataFrame) -> Result<Value, TError> {
    let response = match lhs {
        Expr::Ident(name) => name.clone(),
        e => {
            return Err(TError::value_error(format!(
                "`lm` response must be a column name, got `{}`",
                e.deparse()
            )))
        }
    };
    let mut predictors = Vec::new();
    rhs_terms(rhs, &mut predictors)?;

    let y = column_floats(df, &response)?;
    let n = y.len();
    let k = predictors.len() + 1;
    if n < k {
        return Err(TError::value_error(format!(
            "`lm` needs at least {k} observations, got {n}"
        )));
    }
    let mut design = vec![0.0; n * k];
    for row in 0..n {
        design[row * k] = 1.0;
    }
    for (j, predictor) in predictors.iter().enumerate() {
        let xs = column_floats(df, predictor)?;
        for row in 0..n {
            design[row * k + j + 1] = xs[row];
        }
    }

    // normal equations: (X'X) beta = X'y
    let mut xtx = vec![0.0; k * k];
    for a in 0..k {
        for b in 0..k {
            let mut acc = 0.0;
            for row in 0..n {
                acc += design[row * k + a] * design[row * k + b];
            }
            xtx[a * k + b] = acc;
        }
    }
    let mut xty = vec![0.0; k];
    for a in 0..k {
        xty[a] = (0..n).map(|row| design[row * k + a] * y[row]).sum();
    }
    let xtx_inv =
        invert(&xtx, k).ok_or_else(|| TError::value_error("`lm` design matrix is singular"))?;
    let mut beta = vec![0.0; k];
    for a in 0..k {
        beta[a] = (0..k).map(|b| xtx_inv[a * k + b] * xty[b]).sum();
    }

    let mut fitted = Vec::with_capacity(n);
    for row in 0..n {
        fitted.push((0..k).map(|a| design[row * k + a] * beta[a]).sum::<f64>());
    }
    let residuals: Vec<f64> = y.iter().zip(&fitted).map(|(y, f)| y - f).collect();

    let mut coefficients = IndexMap::new();
    coefficients.insert("(Intercept)".to_string(), Value::Float(beta[0]));
    for (j, predictor) in predictors.iter().enumerate() {
        coefficients.insert(predictor.clone(), Value::Float(beta[j + 1]));
    }
    Ok(Value::List(vec![
        (Some("coefficients".to_string()), Value::Dict(coefficients)),
        (
            Some("fitted".to_string()),
            Value::Vector(fitted.into_iter().map(Value::Float).collect()),
        ),
        (
            Some("residuals".to_string()),
            Value::Vector(residuals.into_iter().map(Value::Float).collect()),
        ),
    ]))
}

#[cfg(test)]
mod tests {
    use crate::interp::eval::Interpreter;
    use crate::interp::{ErrorCode, Value};

    fn eval(src: &str) -> Value {
        Interpreter::new().eval_source(src)
    }

    #[test]
    fn mean_enforces_the_na_policy() {
        match eval("mean([1, NA, 3])") {
            Value::Error(e) => {
                assert_eq!(e.code, ErrorCode::TypeError);
                assert!(e.message.contains("encountered NA value"));
            }
            other => panic!("expected NA error, got {other}"),
        }
        assert_eq!(eval("mean([1, NA, 3], na_rm = true)"), Value::Float(2.0));
        assert_eq!(eval("mean([1, 2, 3])"), Value::Float(2.0));
    }

    #[test]
    fn sum_keeps_int_when_possible() {
        assert_eq!(eval("sum([1, 2, 3])"), Value::Int(6));
        assert_eq!(eval("sum([1, 2.5])"), Value::Float(3.5));
        assert_eq!(eval("sum([1, NA, 3], na_rm = true)"), Value::Int(4));
    }

    #[test]
    fn spread_statistics() {
        assert_eq!(eval("var([2, 4, 6])"), Value::Float(4.0));
        assert_eq!(eval("sd([2, 4, 6])"), Value::Float(2.0));
        assert_eq!(eval("median([3, 1, 2])"), Value::Float(2.0));
        assert_eq!(eval("median([4, 1, 2, 3])"), Value::Float(2.5));
        assert_eq!(eval("quantile([1, 2, 3, 4, 5], 0.5)"), Value::Float(3.0));
        assert_eq!(eval("quantile([1, 2, 3, 4], 0.25)"), Value::Float(1.75));
    }

    #[test]
    fn extremes_preserve_int() {
        assert_eq!(eval("min([3, 1, 2])"), Value::Int(1));
        assert_eq!(eval("max([3, 1, 2.5])"), Value::Int(3));
        match eval("min([])") {
            Value::Error(e) => assert_eq!(e.code, ErrorCode::ValueError),
            other => panic!("expected error, got {other}"),
        }
    }

    #[test]
    fn correlation_is_scale_invariant() {
        let v = eval("cor([1, 2, 3, 4], [10, 20, 30, 40])");
        match v {
            Value::Float(c) => assert!((c - 1.0).abs() < 1e-12),
            other => panic!("expected float, got {other}"),
        }
    }

    #[test]
    fn lm_recovers_exact_linear_data() {
        // y = 2x + 1
        let v = eval(
            "df = dataframe(x = [1, 2, 3, 4], y = [3, 5, 7, 9])\nfit = lm(y ~ x, df)\nfit.coefficients.x",
        );
        match v {
            Value::Float(slope) => assert!((slope - 2.0).abs() < 1e-9),
            other => panic!("expected slope, got {other}"),
        }
        let resid = eval(
            "df = dataframe(x = [1, 2, 3, 4], y = [3, 5, 7, 9])\nsum(lm(y ~ x, df).residuals)",
        );
        match resid {
            Value::Float(r) => assert!(r.abs() < 1e-9),
            other => panic!("expected residual sum, got {other}"),
        }
    }
}
