use rand::seq::SliceRandom;
use rand::Rng;

use super::{binary_float, unary_float, Builtin};
use crate::interp::value::NDArray;
use crate::interp::{TError, Value};

pub fn builtins() -> Vec<Builtin> {
    vec![
        Builtin::new("abs", 1, Some(1), "Absolute value; ints stay ints.", |_, _, site| {
            match site.arg(0) {
                Value::Int(n) => Value::Int(n.abs()),
                Value::Float(x) => Value::Float(x.abs()),
                Value::Na(_) => Value::error(TError::na_operand("`abs` received NA")),
                v => super::map_numeric(v, "abs", f64::abs),
            }
        }),
        unary_float("sqrt", "Square root.", f64::sqrt),
        unary_float("exp", "e raised to the argument.", f64::exp),
        unary_float("log", "Natural logarithm.", f64::ln),
        unary_float("log2", "Base-2 logarithm.", f64::log2),
        unary_float("log10", "Base-10 logarithm.", f64::log10),
        unary_float("floor", "Round down.", f64::floor),
        unary_float("ceiling", "Round up.", f64::ceil),
        unary_float("round", "Round half away from zero.", f64::round),
        unary_float("sin", "Sine.", f64::sin),
        unary_float("cos", "Cosine.", f64::cos),
        unary_float("tan", "Tangent.", f64::tan),
        binary_float("pow", "x raised to the power y.", f64::powf),
        Builtin::new("ndarray", 2, Some(2), "Build an ndarray from data and a shape vector.", |_, _, site| {
            let data = match numeric_vector(site.arg(0), "ndarray") {
                Ok(v) => v,
                Err(e) => return Value::error(e),
            };
            let shape = match site.arg(1) {
                Value::Vector(dims) => {
                    let mut shape = Vec::with_capacity(dims.len());
                    for d in dims {
                        match d.get_usize() {
                            Ok(n) => shape.push(n),
                            Err(e) => return Value::error(e),
                        }
                    }
                    shape
                }
                v => {
                    return Value::error(TError::type_error(format!(
                        "`ndarray` shape must be a vector, got {}",
                        v.kind()
                    )))
                }
            };
            match NDArray::new(shape, data) {
                Ok(a) => Value::NDArray(a),
                Err(e) => Value::error(e),
            }
        }),
        Builtin::new("shape", 1, Some(1), "Shape vector of an ndarray.", |_, _, site| {
            match site.arg(0) {
                Value::NDArray(a) => Value::Vector(
                    a.shape.iter().map(|&d| Value::Int(d as i64)).collect(),
                ),
                v => Value::error(TError::type_error(format!(
                    "`shape` expects an ndarray, got {}",
                    v.kind()
                ))),
            }
        }),
        Builtin::new("transpose", 1, Some(1), "Transpose a rank-2 ndarray.", |_, _, site| {
            let a = match matrix(site.arg(0), "transpose") {
                Ok(a) => a,
                Err(e) => return Value::error(e),
            };
            let (rows, cols) = (a.shape[0], a.shape[1]);
            let mut data = vec![0.0; rows * cols];
            for r in 0..rows {
                for c in 0..cols {
                    data[c * rows + r] = a.data[r * cols + c];
                }
            }
            Value::NDArray(NDArray {
                shape: vec![cols, rows],
                data,
            })
        }),
        Builtin::new("matmul", 2, Some(2), "Matrix product of two rank-2 ndarrays.", |_, _, site| {
            let a = match matrix(site.arg(0), "matmul") {
                Ok(a) => a,
                Err(e) => return Value::error(e),
            };
            let b = match matrix(site.arg(1), "matmul") {
                Ok(b) => b,
                Err(e) => return Value::error(e),
            };
            let (n, k) = (a.shape[0], a.shape[1]);
            let (k2, m) = (b.shape[0], b.shape[1]);
            if k != k2 {
                return Value::error(TError::value_error(format!(
                    "`matmul` shapes do not agree: {n}x{k} vs {k2}x{m}"
                )));
            }
            let mut data = vec![0.0; n * m];
            for i in 0..n {
                for j in 0..m {
                    let mut acc = 0.0;
                    for t in 0..k {
                        acc += a.data[i * k + t] * b.data[t * m + j];
                    }
                    data[i * m + j] = acc;
                }
            }
            Value::NDArray(NDArray {
                shape: vec![n, m],
                data,
            })
        }),
        Builtin::new("kron", 2, Some(2), "Kronecker product of two rank-2 ndarrays.", |_, _, site| {
            let a = match matrix(site.arg(0), "kron") {
                Ok(a) => a,
                Err(e) => return Value::error(e),
            };
            let b = match matrix(site.arg(1), "kron") {
                Ok(b) => b,
                Err(e) => return Value::error(e),
            };
            let (ar, ac) = (a.shape[0], a.shape[1]);
            let (br, bc) = (b.shape[0], b.shape[1]);
            let (rows, cols) = (ar * br, ac * bc);
            let mut data = vec![0.0; rows * cols];
            for i in 0..ar {
                for j in 0..ac {
                    let scale = a.data[i * ac + j];
                    for p in 0..br {
                        for q in 0..bc {
                            let r = i * br + p;
                            let c = j * bc + q;
                            data[r * cols + c] = scale * b.data[p * bc + q];
                        }
                    }
                }
            }
            Value::NDArray(NDArray {
                shape: vec![rows, cols],
                data,
            })
        }),
        Builtin::new("inv", 1, Some(1), "Inverse of a square rank-2 ndarray.", |_, _, site| {
            let a = match matrix(site.arg(0), "inv") {
                Ok(a) => a,
                Err(e) => return Value::error(e),
            };
            if a.shape[0] != a.shape[1] {
                return Value::error(TError::value_error(format!(
                    "`inv` expects a square matrix, got {}x{}",
                    a.shape[0], a.shape[1]
                )));
            }
            match invert(&a.data, a.shape[0]) {
                Some(data) => Value::NDArray(NDArray {
                    shape: a.shape.clone(),
                    data,
                }),
                None => Value::error(TError::value_error("`inv` of a singular matrix")),
            }
        }),
        Builtin::new("runif", 1, Some(3), "Uniform random floats in [min, max).", |_, _, site| {
            let n = match site.arg(0).get_usize() {
                Ok(n) => n,
                Err(e) => return Value::error(e),
            };
            let min = match site.positional.get(1) {
                Some(v) => match v.get_float() {
                    Ok(x) => x,
                    Err(e) => return Value::error(e),
                },
                None => 0.0,
            };
            let max = match site.positional.get(2) {
                Some(v) => match v.get_float() {
                    Ok(x) => x,
                    Err(e) => return Value::error(e),
                },
                None => 1.0,
            };
            if max <= min {
                return Value::error(TError::value_error(format!(
                    "`runif` range is empty: [{min}, {max})"
                )));
            }
            let mut rng = rand::thread_rng();
            Value::Vector(
                (0..n)
                    .map(|_| Value::Float(rng.gen_range(min..max)))
                    .collect(),
            )
        }),
        Builtin::new("sample", 1, Some(2), "Sample elements of a vector without replacement.", |_, _, site| {
            let items = match site.arg(0) {
                Value::Vector(items) => items.clone(),
                v => {
                    return Value::error(TError::type_error(format!(
                        "`sample` expects a vector, got {}",
                        v.kind()
                    )))
                }
            };
            let size = match site.positional.get(1) {
                Some(v) => match v.get_usize() {
                    Ok(n) => n,
                    Err(e) => return Value::error(e),
                },
                None => items.len(),
            };
            let replace = match site.named_bool("replace", false) {
                Ok(b) => b,
                Err(e) => return Value::error(e),
            };
            let mut rng = rand::thread_rng();
            if replace {
                let mut out = Vec::with_capacity(size);
                for _ in 0..size {
                    match items.choose(&mut rng) {
                        Some(v) => out.push(v.clone()),
                        None => {
                            return Value::error(TError::value_error(
                                "`sample` of an empty vector",
                            ))
                        }
                    }
                }
                Value::Vector(out)
            } else {
                if size > items.len() {
                    return Value::error(TError::value_error(format!(
                        "`sample` size {size} exceeds vector length {}",
                        items.len()
                    )));
                }
                let mut shuffled = items;
                shuffled.shuffle(&mut rng);
                shuffled.truncate(size);
                Value::Vector(shuffled)
            }
        })
        .named(&["replace"]),
    ]
}

pub fn numeric_vector(v: &Value, name: &str) -> Result<Vec<f64>, TError> {
    match v {
        Value::Vector(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                match item {
                    Value::Na(_) => {
                        return Err(TError::na_operand(format!("`{name}` encountered NA value")))
                    }
                    item => out.push(item.get_float()?),
                }
            }
            Ok(out)
        }
        Value::NDArray(a) => Ok(a.data.clone()),
        v => Err(TError::type_error(format!(
            "`{name}` expects a numeric vector, got {}",
            v.kind()
        ))),
    }
}

fn matrix<'a>(v: &'a Value, name: &str) -> Result<&'a NDArray, TError> {
    match v {
        Value::NDArray(a) if a.rank() == 2 => Ok(a),
        Value::NDArray(a) => Err(TError::value_error(format!(
            "`{name}` expects a rank-2 ndarray, got rank {}",
            a.rank()
        ))),
        v => Err(TError::type_error(format!(
            "`{name}` expects an ndarray, got {}",
            v.kind()
        ))),
    }
}

/// Gauss-Jordan elimination with partial pivoting. `None` for a singular
/// matrix.
pub fn invert(data: &[f64], n: usize) -> Option<Vec<f64>> {
    let mut a = data.to_vec();
    let mut inv = vec![0.0; n * n];
    for i in 0..n {
        inv[i * n + i] = 1.0;
    }
    for col in 0..n {
        let pivot_row = (col..n).max_by(|&r1, &r2| {
            a[r1 * n + col]
                .abs()
                .partial_cmp(&a[r2 * n + col].abs())
                .unwrap_or(std::cmp::Ordering::Equal)
        })?;
        let pivot = a[pivot_row * n + col];
        if pivot.abs() < 1e-12 {
            return None;
        }
        if pivot_row != col {
            for k in 0..n {
                a.swap(col * n + k, pivot_row * n + k);
                inv.swap(col * n + k, pivot_row * n + k);
            }
        }
        let scale = a[col * n + col];
        for k in 0..n {
            a[col * n + k] /= scale;
            inv[col * n + k] /= scale;
        }
        for row in 0..n {
            if row == col {
                continue;
            }
            let factor = a[row * n + col];
            if factor == 0.0 {
                continue;
            }
            for k in 0..n {
                a[row * n + k] -= factor * a[col * n + k];
                inv[row * n + k] -= factor * inv[col * n + k];
            }
        }
    }
    Some(inv)
}

#[cfg(test)]
mod tests {
    use crate::interp::eval::Interpreter;
    use crate::interp::value::NDArray;
    use crate::interp::{ErrorCode, Value};

    fn eval(src: &str) -> Value {
        Interpreter::new().eval_source(src)
    }

    #[test]
    fn vectorized_math() {
        assert_eq!(
            eval("sqrt([1, 4, 9])"),
            Value::Vector(vec![
                Value::Float(1.0),
                Value::Float(2.0),
                Value::Float(3.0)
            ])
        );
        assert_eq!(eval("abs(-3)"), Value::Int(3));
        assert_eq!(eval("pow(2, 10)"), Value::Float(1024.0));
    }

    #[test]
    fn ndarray_construction_and_shape() {
        assert_eq!(
            eval("shape(ndarray([1, 2, 3, 4, 5, 6], [2, 3]))"),
            Value::Vector(vec![Value::Int(2), Value::Int(3)])
        );
        match eval("ndarray([1, 2, 3], [2, 2])") {
            Value::Error(e) => assert_eq!(e.code, ErrorCode::ValueError),
            other => panic!("expected shape error, got {other}"),
        }
    }

    #[test]
    fn matmul_and_transpose() {
        let v = eval(
            "a = ndarray([1, 2, 3, 4], [2, 2])\nb = ndarray([5, 6, 7, 8], [2, 2])\nmatmul(a, b)",
        );
        assert_eq!(
            v,
            Value::NDArray(NDArray::new(vec![2, 2], vec![19.0, 22.0, 43.0, 50.0]).unwrap())
        );
        let t = eval("transpose(ndarray([1, 2, 3, 4, 5, 6], [2, 3]))");
        assert_eq!(
            t,
            Value::NDArray(
                NDArray::new(vec![3, 2], vec![1.0, 4.0, 2.0, 5.0, 3.0, 6.0]).unwrap()
            )
        );
    }

    #[test]
    fn kron_matches_hand_computation() {
        let v = eval("kron(ndarray([1, 2], [1, 2]), ndarray([0, 1], [1, 2]))");
        assert_eq!(
            v,
            Value::NDArray(NDArray::new(vec![1, 4], vec![0.0, 1.0, 0.0, 2.0]).unwrap())
        );
    }

    #[test]
    fn inv_round_trips_to_identity() {
        let v = eval(
            "a = ndarray([4, 7, 2, 6], [2, 2])\nmatmul(a, inv(a))",
        );
        match v {
            Value::NDArray(m) => {
                let expected = [1.0, 0.0, 0.0, 1.0];
                for (got, want) in m.data.iter().zip(expected) {
                    assert!((got - want).abs() < 1e-9, "got {got}, want {want}");
                }
            }
            other => panic!("expected ndarray, got {other}"),
        }
        match eval("inv(ndarray([1, 2, 2, 4], [2, 2]))") {
            Value::Error(e) => assert_eq!(e.code, ErrorCode::ValueError),
            other => panic!("expected singular error, got {other}"),
        }
    }

    #[test]
    fn sampling_respects_bounds() {
        match eval("runif(3)") {
            Value::Vector(v) => {
                assert_eq!(v.len(), 3);
                for x in v {
                    match x {
                        Value::Float(f) => assert!((0.0..1.0).contains(&f)),
                        other => panic!("expected float, got {other}"),
                    }
                }
            }
            other => panic!("expected vector, got {other}"),
        }
        match eval("sample([1, 2, 3], 2)") {
            Value::Vector(v) => assert_eq!(v.len(), 2),
            other => panic!("expected vector, got {other}"),
        }
        match eval("sample([1, 2], 5)") {
            Value::Error(e) => assert_eq!(e.code, ErrorCode::ValueError),
            other => panic!("expected error, got {other}"),
        }
    }
}
