use chrono::NaiveDateTime;
use indexmap::IndexMap;

/// An XML-RPC value.
///
/// Structs preserve the order in which members were first seen; a duplicate
/// member name overwrites the value at its original position (see
/// `xml::decode` for the parse-time warning this triggers).
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    /// A 32-bit signed integer (`<i4>` or `<int>`).
    Int(i32),

    /// A boolean (`<boolean>`, `0` == false, `1` == true).
    Bool(bool),

    /// A string (`<string>`, or bare text inside `<value>`).
    String(String),

    /// An IEEE-754 double (`<double>`).
    Double(f64),

    /// A naive ISO-8601 date-time (`<dateTime.iso8601>`).
    DateTime(NaiveDateTime),

    /// Base64-encoded binary data (`<base64>`).
    Base64(Vec<u8>),

    /// An ordered sequence of values (`<array>`).
    Array(Vec<Value>),

    /// A named struct (`<struct>`), members in first-seen order.
    Struct(IndexMap<String, Value>),
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Base64(v)
    }
}

impl From<NaiveDateTime> for Value {
    fn from(v: NaiveDateTime) -> Self {
        Value::DateTime(v)
    }
}

impl<T> From<Vec<T>> for Value
where
    Value: From<T>,
{
    fn from(vs: Vec<T>) -> Self {
        Value::Array(vs.into_iter().map(Value::from).collect())
    }
}

/// An XML-RPC method call (`<methodCall>`): a request, or a server-initiated
/// callback when it arrives on a handle with the high bit clear.
#[derive(Clone, Debug, PartialEq)]
pub struct MethodCall {
    pub name: String,
    pub params: Vec<Value>,
}

/// An XML-RPC method response (`<methodResponse>`).
///
/// A fault is distinct from a transport [`crate::Error`]: it is a
/// well-formed reply that the server chose to answer with an error.
#[derive(Clone, Debug, PartialEq)]
pub enum Response {
    Value(Value),
    Fault { code: i32, message: String },
}
