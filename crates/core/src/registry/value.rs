//! Typed value cells shared between collectors, bindings and readers
//!
//! A cell is the storage a variable points at. Collectors own the cells of
//! the values they collect and hand bindings a clone of the `Arc`; custom
//! variables allocate their own. Numeric cells are lock-free so the expression
//! evaluator can read them while a collector writes.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use hibench_common::sync::RwLock;
use serde::Serialize;

use crate::errors::CoreResult;

/// Kind of value a variable exposes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VariableType {
    Text,
    CalculatedNumber,
    Time,
    /// Reference to a value owned by the collector
    Collected,
}

/// Storage location of a variable value
#[derive(Debug)]
pub enum ValueCell {
    /// `f64` stored as its bit pattern
    Number(AtomicU64),
    /// Unix timestamp, seconds
    Time(AtomicI64),
    Collected(AtomicI64),
    Text(RwLock<String>),
}

/// Point-in-time copy of a cell
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Value {
    /// `NaN` means undefined
    Number(f64),
    Time(i64),
    Collected(i64),
    Text(String),
}

impl Value {
    /// Numeric reading, as the expression evaluator sees it
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(value) => Some(*value),
            #[allow(clippy::cast_precision_loss)]
            Self::Time(value) | Self::Collected(value) => Some(*value as f64),
            Self::Text(_) => None,
        }
    }
}

impl ValueCell {
    pub fn number(value: f64) -> Self {
        Self::Number(AtomicU64::new(value.to_bits()))
    }

    /// Numeric cell holding `NaN`
    pub fn undefined() -> Self {
        Self::number(f64::NAN)
    }

    pub fn time(value: i64) -> Self {
        Self::Time(AtomicI64::new(value))
    }

    pub fn collected(value: i64) -> Self {
        Self::Collected(AtomicI64::new(value))
    }

    pub fn text<S: Into<String>>(value: S) -> Self {
        Self::Text(RwLock::with_label("text variable", value.into()))
    }

    pub fn variable_type(&self) -> VariableType {
        match self {
            Self::Number(_) => VariableType::CalculatedNumber,
            Self::Time(_) => VariableType::Time,
            Self::Collected(_) => VariableType::Collected,
            Self::Text(_) => VariableType::Text,
        }
    }

    /// Snapshot the current value
    ///
    /// # Errors
    /// Fails only when a text cell's lock is poisoned.
    pub fn load(&self) -> CoreResult<Value> {
        Ok(match self {
            Self::Number(bits) => Value::Number(f64::from_bits(bits.load(Ordering::Acquire))),
            Self::Time(value) => Value::Time(value.load(Ordering::Acquire)),
            Self::Collected(value) => Value::Collected(value.load(Ordering::Acquire)),
            Self::Text(text) => Value::Text(text.read_lock()?.clone()),
        })
    }

    /// Numeric content, `None` for other kinds
    pub fn load_number(&self) -> Option<f64> {
        match self {
            Self::Number(bits) => Some(f64::from_bits(bits.load(Ordering::Acquire))),
            _ => None,
        }
    }

    /// Store a number, returning the previous one; `None` if not numeric
    pub fn swap_number(&self, value: f64) -> Option<f64> {
        match self {
            Self::Number(bits) => Some(f64::from_bits(bits.swap(value.to_bits(), Ordering::AcqRel))),
            _ => None,
        }
    }

    /// Store an integer into a time or collected cell; `false` otherwise
    pub fn store_integer(&self, value: i64) -> bool {
        match self {
            Self::Time(cell) | Self::Collected(cell) => {
                cell.store(value, Ordering::Release);
                true
            }
            _ => false,
        }
    }

    /// Replace the text of a text cell
    ///
    /// Returns `Ok(false)` for other kinds.
    ///
    /// # Errors
    /// Fails when the text lock is poisoned.
    pub fn store_text<S: Into<String>>(&self, value: S) -> CoreResult<bool> {
        match self {
            Self::Text(text) => {
                *text.write_lock()? = value.into();
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

/// Whether two readings of a numeric variable differ
///
/// Two `NaN`s are the same reading: both are "undefined".
pub fn number_changed(old: f64, new: f64) -> bool {
    if old.is_nan() && new.is_nan() {
        return false;
    }
    #[allow(clippy::float_cmp)]
    let changed = old != new;
    changed
}
