//! Conversion between typed values and the string form used in SQL text and rows.
//!
//! Every scalar the engine writes into a statement or reads out of a result row
//! passes through [`SqlValue`]. SQL NULL is represented in row data by
//! [`NULL_SENTINEL`], a string no database driver produces for real text.

use crate::error::{Error, Result, TypeError};

/// Reserved string standing for SQL NULL in row data and rendered literals.
pub const NULL_SENTINEL: &str = "\u{1}NULL\u{1}";

/// Check whether a row value is the null sentinel.
#[inline]
pub fn is_null_sentinel(value: &str) -> bool {
    value == NULL_SENTINEL
}

/// A value that can be rendered to and parsed from its SQL string form.
///
/// Parsing writes into an existing value so that entity fields can be
/// populated in place.
pub trait SqlValue {
    /// Render this value as the string that goes into SQL text.
    fn to_sql_string(&self) -> String;

    /// Parse `raw` into `self`.
    fn from_sql_string(&mut self, raw: &str) -> Result<()>;

    /// Whether this value stands for SQL NULL on its own.
    fn is_sql_null(&self) -> bool {
        false
    }
}

fn parse_error<T>(raw: &str) -> Error {
    Error::Type(TypeError {
        expected: std::any::type_name::<T>(),
        actual: format!("'{}'", raw),
        column: None,
    })
}

impl SqlValue for bool {
    fn to_sql_string(&self) -> String {
        if *self { "1" } else { "0" }.to_string()
    }

    fn from_sql_string(&mut self, raw: &str) -> Result<()> {
        *self = match raw.trim() {
            "1" | "t" | "true" | "TRUE" => true,
            "0" | "f" | "false" | "FALSE" => false,
            _ => return Err(parse_error::<bool>(raw)),
        };
        Ok(())
    }
}

macro_rules! impl_sql_value_parse {
    ($($ty:ty),* $(,)?) => {
        $(
            impl SqlValue for $ty {
                fn to_sql_string(&self) -> String {
                    self.to_string()
                }

                fn from_sql_string(&mut self, raw: &str) -> Result<()> {
                    *self = raw.trim().parse::<$ty>().map_err(|_| parse_error::<$ty>(raw))?;
                    Ok(())
                }
            }
        )*
    };
}

impl_sql_value_parse!(i8, i16, i32, i64, u8, u16, u32, u64, isize, usize, f32, f64);

impl SqlValue for String {
    fn to_sql_string(&self) -> String {
        self.clone()
    }

    fn from_sql_string(&mut self, raw: &str) -> Result<()> {
        raw.clone_into(self);
        Ok(())
    }
}

impl SqlValue for char {
    fn to_sql_string(&self) -> String {
        self.to_string()
    }

    fn from_sql_string(&mut self, raw: &str) -> Result<()> {
        let mut chars = raw.chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) => {
                *self = c;
                Ok(())
            }
            _ => Err(parse_error::<char>(raw)),
        }
    }
}

impl<T: SqlValue + Default> SqlValue for Option<T> {
    fn to_sql_string(&self) -> String {
        match self {
            Some(value) => value.to_sql_string(),
            None => NULL_SENTINEL.to_string(),
        }
    }

    fn from_sql_string(&mut self, raw: &str) -> Result<()> {
        if is_null_sentinel(raw) {
            *self = None;
            return Ok(());
        }
        let mut value = T::default();
        value.from_sql_string(raw)?;
        *self = Some(value);
        Ok(())
    }

    fn is_sql_null(&self) -> bool {
        match self {
            Some(value) => value.is_sql_null(),
            None => true,
        }
    }
}

impl SqlValue for serde_json::Value {
    fn to_sql_string(&self) -> String {
        self.to_string()
    }

    fn from_sql_string(&mut self, raw: &str) -> Result<()> {
        *self = serde_json::from_str(raw).map_err(|e| {
            Error::Type(TypeError {
                expected: "JSON",
                actual: e.to_string(),
                column: None,
            })
        })?;
        Ok(())
    }

    fn is_sql_null(&self) -> bool {
        self.is_null()
    }
}

/// A pair of conversion functions for one column.
///
/// The native converter of a [`SqlValue`] type is [`Converter::native`];
/// custom encodings (enums stored as codes, timestamps as text) supply their
/// own pair with [`Converter::new`].
pub struct Converter<T> {
    encode: fn(&T) -> String,
    decode: fn(&mut T, &str) -> Result<()>,
}

impl<T> Converter<T> {
    pub fn new(encode: fn(&T) -> String, decode: fn(&mut T, &str) -> Result<()>) -> Self {
        Self { encode, decode }
    }

    pub fn encode(&self, value: &T) -> String {
        (self.encode)(value)
    }

    pub fn decode(&self, value: &mut T, raw: &str) -> Result<()> {
        (self.decode)(value, raw)
    }
}

impl<T: SqlValue> Converter<T> {
    pub fn native() -> Self {
        Self {
            encode: <T as SqlValue>::to_sql_string,
            decode: <T as SqlValue>::from_sql_string,
        }
    }
}

impl<T> Clone for Converter<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Converter<T> {}

impl<T> std::fmt::Debug for Converter<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Converter").finish_non_exhaustive()
    }
}

/// Per-column policy deciding whether the current value is persisted as NULL.
pub struct NullPredicate<T>(fn(&T) -> bool);

impl<T> NullPredicate<T> {
    /// The value is never NULL.
    pub fn never() -> Self {
        fn no<T>(_: &T) -> bool {
            false
        }
        Self(no::<T>)
    }

    /// NULL whenever `predicate` returns true.
    pub fn when(predicate: fn(&T) -> bool) -> Self {
        Self(predicate)
    }

    pub fn test(&self, value: &T) -> bool {
        (self.0)(value)
    }
}

impl<T: SqlValue> NullPredicate<T> {
    /// NULL when the value reports itself as NULL (`None`, JSON `null`).
    pub fn native() -> Self {
        Self(<T as SqlValue>::is_sql_null)
    }
}

impl<T> Clone for NullPredicate<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for NullPredicate<T> {}

impl<T> std::fmt::Debug for NullPredicate<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("NullPredicate")
    }
}
