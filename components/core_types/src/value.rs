//! Engine value representation.
//!
//! Primitive values are stored inline. Objects, arrays and functions live in
//! the engine heap and are referenced through a [`Handle`]: an entry in the
//! engine's handle table that must be released explicitly once the holder no
//! longer needs it.

use std::fmt;

/// Opaque reference to a heap cell held in an engine's handle table.
///
/// Copying a `Handle` does not retain anything; two copies name the same
/// table entry and releasing one releases both. Use the engine's `duplicate`
/// to obtain an independently releasable handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Handle(u64);

impl Handle {
    /// Creates a handle from its raw table id.
    pub const fn from_raw(raw: u64) -> Self {
        Handle(raw)
    }

    /// Returns the raw table id.
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Represents any engine value.
///
/// Numbers use two representations: `Smi` for integral values that fit in
/// 32 bits and `Double` for everything else. [`Value::number`] picks the
/// right one, so integral doubles never appear as `Double`.
///
/// # Examples
///
/// ```
/// use core_types::Value;
///
/// let undefined = Value::Undefined;
/// let number = Value::Smi(42);
/// let float = Value::Double(3.14);
///
/// assert!(!undefined.is_truthy());
/// assert!(number.is_truthy());
/// assert_eq!(float.type_of(), "number");
/// assert_eq!(Value::number(6688.0), Value::Smi(6688));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// The undefined value
    Undefined,
    /// The null value
    Null,
    /// Boolean (true or false)
    Boolean(bool),
    /// Small integer (fits in 32 bits)
    Smi(i32),
    /// IEEE 754 double-precision floating point
    Double(f64),
    /// String value
    String(String),
    /// Plain object living in the engine heap
    Object(Handle),
    /// Array living in the engine heap
    Array(Handle),
    /// Function living in the engine heap
    Function(Handle),
}

impl Value {
    /// Creates a number, normalizing integral values into `Smi`.
    ///
    /// Negative zero and values outside the `i32` range stay `Double`.
    ///
    /// # Examples
    ///
    /// ```
    /// use core_types::Value;
    ///
    /// assert_eq!(Value::number(1500.0), Value::Smi(1500));
    /// assert_eq!(Value::number(0.5), Value::Double(0.5));
    /// assert_eq!(Value::number(4e10), Value::Double(4e10));
    /// ```
    pub fn number(n: f64) -> Self {
        let is_negative_zero = n == 0.0 && n.is_sign_negative();
        if n.fract() == 0.0
            && n >= i32::MIN as f64
            && n <= i32::MAX as f64
            && !is_negative_zero
        {
            Value::Smi(n as i32)
        } else {
            Value::Double(n)
        }
    }

    /// Returns the numeric value, if this is a number.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Smi(n) => Some(*n as f64),
            Value::Double(n) => Some(*n),
            _ => None,
        }
    }

    /// Returns the integer value, if this is a `Smi`.
    pub fn as_i32(&self) -> Option<i32> {
        match self {
            Value::Smi(n) => Some(*n),
            _ => None,
        }
    }

    /// Returns the string contents, if this is a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the heap handle of an object, array or function.
    pub fn handle(&self) -> Option<Handle> {
        match self {
            Value::Object(h) | Value::Array(h) | Value::Function(h) => Some(*h),
            _ => None,
        }
    }

    /// Returns true for `null` and `undefined`.
    pub fn is_nullish(&self) -> bool {
        matches!(self, Value::Undefined | Value::Null)
    }

    /// Returns true if this value is a function.
    pub fn is_function(&self) -> bool {
        matches!(self, Value::Function(_))
    }

    /// Returns whether this value is truthy.
    ///
    /// The falsy values are undefined, null, false, 0, NaN and the empty
    /// string. All heap values are truthy.
    ///
    /// # Examples
    ///
    /// ```
    /// use core_types::{Handle, Value};
    ///
    /// assert!(!Value::Undefined.is_truthy());
    /// assert!(!Value::Null.is_truthy());
    /// assert!(!Value::Boolean(false).is_truthy());
    /// assert!(!Value::Smi(0).is_truthy());
    /// assert!(!Value::Double(f64::NAN).is_truthy());
    ///
    /// assert!(Value::Boolean(true).is_truthy());
    /// assert!(Value::Smi(42).is_truthy());
    /// assert!(Value::Object(Handle::from_raw(1)).is_truthy());
    /// ```
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Undefined => false,
            Value::Null => false,
            Value::Boolean(b) => *b,
            Value::Smi(n) => *n != 0,
            Value::Double(n) => !n.is_nan() && *n != 0.0,
            Value::String(s) => !s.is_empty(),
            Value::Object(_) | Value::Array(_) | Value::Function(_) => true,
        }
    }

    /// Returns the `typeof` result for this value.
    ///
    /// # Examples
    ///
    /// ```
    /// use core_types::{Handle, Value};
    ///
    /// assert_eq!(Value::Undefined.type_of(), "undefined");
    /// assert_eq!(Value::Null.type_of(), "object");
    /// assert_eq!(Value::Boolean(true).type_of(), "boolean");
    /// assert_eq!(Value::Smi(42).type_of(), "number");
    /// assert_eq!(Value::Function(Handle::from_raw(3)).type_of(), "function");
    /// ```
    pub fn type_of(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Null => "object", // historical quirk
            Value::Boolean(_) => "boolean",
            Value::Smi(_) | Value::Double(_) => "number",
            Value::String(_) => "string",
            Value::Object(_) | Value::Array(_) => "object",
            Value::Function(_) => "function",
        }
    }

    /// Short kind name used in diagnostics.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Null => "null",
            Value::Boolean(_) => "boolean",
            Value::Smi(_) => "integer",
            Value::Double(_) => "double",
            Value::String(_) => "string",
            Value::Object(_) => "object",
            Value::Array(_) => "array",
            Value::Function(_) => "function",
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Smi(n)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::number(n)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

/// String conversion for primitives.
///
/// Heap values render as placeholders here because their contents live in
/// the engine; the engine's `display` renders them fully.
///
/// # Examples
///
/// ```
/// use core_types::Value;
///
/// assert_eq!(Value::Undefined.to_string(), "undefined");
/// assert_eq!(Value::Null.to_string(), "null");
/// assert_eq!(Value::Boolean(true).to_string(), "true");
/// assert_eq!(Value::Smi(42).to_string(), "42");
/// assert_eq!(Value::Double(0.5).to_string(), "0.5");
/// ```
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undefined => write!(f, "undefined"),
            Value::Null => write!(f, "null"),
            Value::Boolean(b) => write!(f, "{}", if *b { "true" } else { "false" }),
            Value::Smi(n) => write!(f, "{}", n),
            Value::Double(n) => {
                if n.is_nan() {
                    write!(f, "NaN")
                } else if n.is_infinite() {
                    if n.is_sign_positive() {
                        write!(f, "Infinity")
                    } else {
                        write!(f, "-Infinity")
                    }
                } else if n.fract() == 0.0 && n.abs() < 1e15 {
                    // Integer-valued doubles display without decimal point
                    write!(f, "{}", *n as i64)
                } else {
                    write!(f, "{}", n)
                }
            }
            Value::String(s) => write!(f, "{}", s),
            Value::Object(_) => write!(f, "[object Object]"),
            Value::Array(_) => write!(f, "[object Array]"),
            Value::Function(_) => write!(f, "function () {{ [native code] }}"),
        }
    }
}
