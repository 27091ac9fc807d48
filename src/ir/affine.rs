//! Affine expressions over named indices.
//!
//! An affine expression is a linear combination of named indices plus a constant:
//! `aff = c0 + c1*i1 + c2*i2 + ... + cn*in`

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::ops::{Add, Mul};

/// An affine expression: constant + sum(coeff[name] * name)
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Affine {
    /// Coefficient for each index name (zero coefficients are never stored)
    #[serde(default)]
    pub terms: BTreeMap<String, i64>,
    /// Constant term
    #[serde(default)]
    pub constant: i64,
}

impl Affine {
    /// Create a zero expression.
    pub fn zero() -> Self {
        Self::default()
    }

    /// Create a constant expression.
    pub fn constant(value: i64) -> Self {
        Self {
            terms: BTreeMap::new(),
            constant: value,
        }
    }

    /// Create an expression for a single index.
    pub fn index(name: &str) -> Self {
        Self::term(name, 1)
    }

    /// Create `coeff * name`.
    pub fn term(name: &str, coeff: i64) -> Self {
        let mut terms = BTreeMap::new();
        if coeff != 0 {
            terms.insert(name.to_string(), coeff);
        }
        Self { terms, constant: 0 }
    }

    /// Coefficient of an index (0 if absent).
    pub fn get(&self, name: &str) -> i64 {
        self.terms.get(name).copied().unwrap_or(0)
    }

    /// Check if this is a constant expression.
    pub fn is_constant(&self) -> bool {
        self.terms.is_empty()
    }

    /// Check if this expression is zero.
    pub fn is_zero(&self) -> bool {
        self.constant == 0 && self.is_constant()
    }

    /// Multiply every term and the constant by `factor`.
    pub fn scaled(&self, factor: i64) -> Self {
        if factor == 0 {
            return Self::zero();
        }
        Self {
            terms: self.terms.iter().map(|(k, &v)| (k.clone(), v * factor)).collect(),
            constant: self.constant * factor,
        }
    }

    /// Multiply the coefficient of `name` by `factor`, leaving other terms alone.
    pub fn substitute_scale(&self, name: &str, factor: i64) -> Self {
        let mut out = self.clone();
        if let Some(c) = out.terms.get_mut(name) {
            *c *= factor;
        }
        out.terms.retain(|_, c| *c != 0);
        out
    }

    /// Replace index `name` by the expression `value`.
    pub fn substitute(&self, name: &str, value: &Affine) -> Self {
        let coeff = self.get(name);
        if coeff == 0 {
            return self.clone();
        }
        let mut rest = self.clone();
        rest.terms.remove(name);
        rest + value.scaled(coeff)
    }

    /// Iterate over (index name, coefficient) pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&str, i64)> {
        self.terms.iter().map(|(k, &v)| (k.as_str(), v))
    }
}

impl Add for Affine {
    type Output = Affine;

    fn add(mut self, rhs: Affine) -> Affine {
        for (name, coeff) in rhs.terms {
            *self.terms.entry(name).or_insert(0) += coeff;
        }
        self.terms.retain(|_, c| *c != 0);
        self.constant += rhs.constant;
        self
    }
}

impl Mul<i64> for Affine {
    type Output = Affine;

    fn mul(self, rhs: i64) -> Affine {
        self.scaled(rhs)
    }
}

impl fmt::Display for Affine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_zero() {
            return write!(f, "0");
        }
        let mut first = true;
        for (name, coeff) in &self.terms {
            if !first {
                write!(f, " + ")?;
            }
            first = false;
            if *coeff == 1 {
                write!(f, "{}", name)?;
            } else {
                write!(f, "{}*{}", coeff, name)?;
            }
        }
        if self.constant != 0 {
            if first {
                write!(f, "{}", self.constant)?;
            } else {
                write!(f, " + {}", self.constant)?;
            }
        }
        Ok(())
    }
}
