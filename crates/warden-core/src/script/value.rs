//! Runtime values of the snippet language.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use super::interpreter::Scope;
use super::parser::FunctionDef;

/// Natives reachable from sandboxed code, either as capabilities or as
/// language intrinsics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Builtin {
    ConsoleLog,
    ConsoleWarn,
    ConsoleError,
    MathAbs,
    MathFloor,
    MathCeil,
    MathRound,
    MathSqrt,
    MathPow,
    MathMin,
    MathMax,
    JsonStringify,
    JsonParse,
    DateNow,
    Fetch,
    FsReadFile,
    ErrorCtor(ErrorName),
    ToString,
    ToNumber,
    ToBoolean,
    ParseInt,
    ParseFloat,
    IsNaN,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorName {
    Error,
    TypeError,
    RangeError,
}

impl ErrorName {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorName::Error => "Error",
            ErrorName::TypeError => "TypeError",
            ErrorName::RangeError => "RangeError",
        }
    }
}

/// A user function together with the scope it closes over.
#[derive(Clone)]
pub struct Closure {
    pub def: Rc<FunctionDef>,
    pub scope: Rc<RefCell<Scope>>,
}

pub type ObjectRef = Rc<RefCell<Vec<(String, Value)>>>;
pub type ArrayRef = Rc<RefCell<Vec<Value>>>;

#[derive(Clone)]
pub enum Value {
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    Str(Rc<str>),
    Array(ArrayRef),
    Object(ObjectRef),
    Function(Closure),
    Builtin(Builtin),
}

/// Containers nested deeper than this are treated as circular.
const MAX_RENDER_DEPTH: usize = 64;

impl Value {
    pub fn string(s: impl Into<Rc<str>>) -> Self {
        Value::Str(s.into())
    }

    pub fn array(items: Vec<Value>) -> Self {
        Value::Array(Rc::new(RefCell::new(items)))
    }

    pub fn object(props: Vec<(String, Value)>) -> Self {
        Value::Object(Rc::new(RefCell::new(props)))
    }

    pub fn type_of(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Null | Value::Array(_) | Value::Object(_) => "object",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::Str(_) => "string",
            Value::Function(_) | Value::Builtin(_) => "function",
        }
    }

    pub fn is_callable(&self) -> bool {
        matches!(self, Value::Function(_) | Value::Builtin(_))
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Undefined | Value::Null => false,
            Value::Bool(b) => *b,
            Value::Number(n) => *n != 0.0 && !n.is_nan(),
            Value::Str(s) => !s.is_empty(),
            _ => true,
        }
    }

    pub fn to_number(&self) -> f64 {
        match self {
            Value::Undefined => f64::NAN,
            Value::Null => 0.0,
            Value::Bool(b) => f64::from(u8::from(*b)),
            Value::Number(n) => *n,
            Value::Str(s) => {
                let trimmed = s.trim();
                if trimmed.is_empty() {
                    0.0
                } else {
                    trimmed.parse().unwrap_or(f64::NAN)
                }
            }
            Value::Array(items) => {
                let items = items.borrow();
                match items.len() {
                    0 => 0.0,
                    1 => items[0].to_number(),
                    _ => f64::NAN,
                }
            }
            _ => f64::NAN,
        }
    }

    /// `String(value)` semantics.
    pub fn to_display(&self) -> String {
        self.display_at(0)
    }

    fn display_at(&self, depth: usize) -> String {
        match self {
            Value::Undefined => "undefined".into(),
            Value::Null => "null".into(),
            Value::Bool(b) => b.to_string(),
            Value::Number(n) => format_number(*n),
            Value::Str(s) => s.to_string(),
            Value::Array(items) => {
                if depth >= MAX_RENDER_DEPTH {
                    return String::new();
                }
                items
                    .borrow()
                    .iter()
                    .map(|v| match v {
                        Value::Undefined | Value::Null => String::new(),
                        other => other.display_at(depth + 1),
                    })
                    .collect::<Vec<_>>()
                    .join(",")
            }
            Value::Object(props) => match error_parts(&props.borrow()) {
                Some((name, message)) if message.is_empty() => name,
                Some((name, message)) => format!("{name}: {message}"),
                None => "[object Object]".into(),
            },
            Value::Function(closure) => format!(
                "function {}() {{ [code] }}",
                closure.def.name.as_deref().unwrap_or("")
            ),
            Value::Builtin(_) => "function () { [native code] }".into(),
        }
    }

    /// Strict (`===`) equality.
    pub fn strict_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Undefined, Value::Undefined) | (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => Rc::ptr_eq(a, b),
            (Value::Object(a), Value::Object(b)) => Rc::ptr_eq(a, b),
            (Value::Function(a), Value::Function(b)) => Rc::ptr_eq(&a.def, &b.def),
            (Value::Builtin(a), Value::Builtin(b)) => a == b,
            _ => false,
        }
    }

    /// Loose (`==`) equality.
    pub fn loose_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Undefined | Value::Null, Value::Undefined | Value::Null) => true,
            (Value::Undefined | Value::Null, _) | (_, Value::Undefined | Value::Null) => false,
            (Value::Number(_), Value::Str(_) | Value::Bool(_))
            | (Value::Str(_) | Value::Bool(_), Value::Number(_))
            | (Value::Bool(_), Value::Str(_))
            | (Value::Str(_), Value::Bool(_)) => self.to_number() == other.to_number(),
            _ => self.strict_eq(other),
        }
    }

    /// Convert to JSON. Functions and `undefined` members are dropped as
    /// `JSON.stringify` does.
    pub fn to_json(&self) -> Result<serde_json::Value, String> {
        self.json_at(0)
    }

    fn json_at(&self, depth: usize) -> Result<serde_json::Value, String> {
        if depth > MAX_RENDER_DEPTH {
            return Err("converting circular structure to JSON".into());
        }
        Ok(match self {
            Value::Undefined | Value::Function(_) | Value::Builtin(_) | Value::Null => {
                serde_json::Value::Null
            }
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Number(n) => number_to_json(*n),
            Value::Str(s) => serde_json::Value::String(s.to_string()),
            Value::Array(items) => serde_json::Value::Array(
                items
                    .borrow()
                    .iter()
                    .map(|v| v.json_at(depth + 1))
                    .collect::<Result<_, _>>()?,
            ),
            Value::Object(props) => {
                let mut map = serde_json::Map::new();
                for (key, value) in props.borrow().iter() {
                    if matches!(
                        value,
                        Value::Undefined | Value::Function(_) | Value::Builtin(_)
                    ) {
                        continue;
                    }
                    map.insert(key.clone(), value.json_at(depth + 1)?);
                }
                serde_json::Value::Object(map)
            }
        })
    }

    pub fn from_json(json: &serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(*b),
            serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
            serde_json::Value::String(s) => Value::string(s.as_str()),
            serde_json::Value::Array(items) => {
                Value::array(items.iter().map(Value::from_json).collect())
            }
            serde_json::Value::Object(map) => Value::object(
                map.iter()
                    .map(|(k, v)| (k.clone(), Value::from_json(v)))
                    .collect(),
            ),
        }
    }

    /// Render a run's return value: strings verbatim, containers as JSON,
    /// everything else through `String(value)`.
    pub fn render(&self) -> Result<String, String> {
        match self {
            Value::Str(s) => Ok(s.to_string()),
            Value::Array(_) | Value::Object(_) => {
                serde_json::to_string(&self.to_json()?).map_err(|e| e.to_string())
            }
            other => Ok(other.to_display()),
        }
    }

    /// Rough byte cost charged against the unit's memory budget.
    pub fn footprint(&self) -> u64 {
        match self {
            Value::Str(s) => 16 + s.len() as u64,
            Value::Array(items) => 24 + 16 * items.borrow().len() as u64,
            Value::Object(props) => props
                .borrow()
                .iter()
                .map(|(k, _)| 32 + k.len() as u64)
                .sum::<u64>()
                + 24,
            _ => 16,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Str(s) => write!(f, "{s:?}"),
            Value::Builtin(b) => write!(f, "Builtin({b:?})"),
            other => f.write_str(&other.to_display()),
        }
    }
}

/// `name`/`message` of an error-shaped object.
pub fn error_parts(props: &[(String, Value)]) -> Option<(String, String)> {
    let get = |key: &str| {
        props.iter().find_map(|(k, v)| match v {
            Value::Str(s) if k == key => Some(s.to_string()),
            _ => None,
        })
    };
    Some((get("name")?, get("message")?))
}

pub fn error_value(name: &str, message: impl Into<String>) -> Value {
    let message: String = message.into();
    Value::object(vec![
        ("name".into(), Value::string(name)),
        ("message".into(), Value::string(message.as_str())),
    ])
}

/// Numbers in JavaScript notation: integral values print without a fraction.
pub fn format_number(n: f64) -> String {
    if n.is_nan() {
        "NaN".into()
    } else if n.is_infinite() {
        (if n > 0.0 { "Infinity" } else { "-Infinity" }).into()
    } else if n == 0.0 {
        "0".into()
    } else if n.fract() == 0.0 && n.abs() < 1e21 {
        format!("{}", n as i128)
    } else {
        format!("{n}")
    }
}

fn number_to_json(n: f64) -> serde_json::Value {
    if n.fract() == 0.0 && n.abs() < 9_007_199_254_740_992.0 {
        serde_json::Value::from(n as i64)
    } else {
        serde_json::Number::from_f64(n)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_number() {
        assert_eq!(format_number(2.0), "2");
        assert_eq!(format_number(-0.0), "0");
        assert_eq!(format_number(0.5), "0.5");
        assert_eq!(format_number(f64::NAN), "NaN");
        assert_eq!(format_number(f64::NEG_INFINITY), "-Infinity");
        assert_eq!(format_number(1e20), "100000000000000000000");
    }

    #[test]
    fn test_truthiness() {
        assert!(!Value::Number(0.0).is_truthy());
        assert!(!Value::string("").is_truthy());
        assert!(Value::string("0").is_truthy());
        assert!(Value::array(vec![]).is_truthy());
        assert!(!Value::Null.is_truthy());
    }

    #[test]
    fn test_equality() {
        assert!(Value::Number(1.0).loose_eq(&Value::string("1")));
        assert!(!Value::Number(1.0).strict_eq(&Value::string("1")));
        assert!(Value::Null.loose_eq(&Value::Undefined));
        assert!(!Value::Null.strict_eq(&Value::Undefined));
        let a = Value::array(vec![]);
        assert!(a.strict_eq(&a.clone()));
        assert!(!a.strict_eq(&Value::array(vec![])));
    }

    #[test]
    fn test_render() {
        assert_eq!(Value::Number(2.0).render().unwrap(), "2");
        assert_eq!(Value::string("hi").render().unwrap(), "hi");
        let obj = Value::object(vec![
            ("a".into(), Value::Number(1.0)),
            ("skip".into(), Value::Undefined),
            ("b".into(), Value::array(vec![Value::Bool(true), Value::Null])),
        ]);
        assert_eq!(obj.render().unwrap(), r#"{"a":1,"b":[true,null]}"#);
    }

    #[test]
    fn test_circular_render_fails() {
        let arr = Value::array(vec![]);
        if let Value::Array(items) = &arr {
            items.borrow_mut().push(arr.clone());
        }
        assert!(arr.render().unwrap_err().contains("circular"));
        if let Value::Array(items) = &arr {
            items.borrow_mut().clear();
        }
    }

    #[test]
    fn test_error_display() {
        assert_eq!(error_value("TypeError", "bad").to_display(), "TypeError: bad");
        assert_eq!(error_value("Error", "").to_display(), "Error");
    }

    #[test]
    fn test_json_round_trip_preserves_structure() {
        let json = serde_json::json!({"n": 1.5, "list": [1, "two", null]});
        let value = Value::from_json(&json);
        assert_eq!(value.to_json().unwrap(), json);
    }
}
