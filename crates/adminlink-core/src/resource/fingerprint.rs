use std::fmt::Write as _;

/// One scalar in a dependency list.
#[derive(Debug, Clone, PartialEq)]
pub enum Dep {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl From<&str> for Dep {
    fn from(value: &str) -> Self {
        Dep::Str(value.to_string())
    }
}

impl From<String> for Dep {
    fn from(value: String) -> Self {
        Dep::Str(value)
    }
}

impl From<&String> for Dep {
    fn from(value: &String) -> Self {
        Dep::Str(value.clone())
    }
}

impl From<bool> for Dep {
    fn from(value: bool) -> Self {
        Dep::Bool(value)
    }
}

impl From<f64> for Dep {
    fn from(value: f64) -> Self {
        Dep::Float(value)
    }
}

macro_rules! int_dep {
    ($($ty:ty),*) => {
        $(impl From<$ty> for Dep {
            fn from(value: $ty) -> Self {
                Dep::Int(value as i64)
            }
        })*
    };
}

int_dep!(i32, i64, u32, u16, u8);

impl<T: Into<Dep>> From<Option<T>> for Dep {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Dep::Null)
    }
}

/// Comparable reduction of a dependency list.
///
/// Two lists have equal fingerprints exactly when they are element-wise
/// equal. Integral floats compare equal to the matching integer, and NaN
/// equals NaN, so a list always matches itself.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn of(deps: &[Dep]) -> Self {
        let mut encoded = String::new();
        for dep in deps {
            // Strings are length-prefixed so no value can forge a separator.
            let _ = match dep {
                Dep::Null => write!(encoded, "n;"),
                Dep::Bool(b) => write!(encoded, "b{};", b),
                Dep::Int(i) => write!(encoded, "i{};", i),
                Dep::Float(f) if f.fract() == 0.0 && f.abs() < i64::MAX as f64 => {
                    write!(encoded, "i{};", *f as i64)
                }
                Dep::Float(f) if f.is_nan() => write!(encoded, "fNaN;"),
                Dep::Float(f) => write!(encoded, "f{:x};", f.to_bits()),
                Dep::Str(s) => write!(encoded, "s{}:{};", s.len(), s),
            };
        }
        Fingerprint(encoded)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}
