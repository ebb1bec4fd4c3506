//! Parser for the `Vehicles` column.
//!
//! The enrichment stage writes each accident's vehicles as a Python literal,
//! e.g. `[{'VehicleNumber': 1, 'Make': 'Cessna', 'SerialNumber': None}]`.
//! JSON spelling (`null`, `true`, double quotes) is accepted as well.
//!
//! Parsing is strict about syntax (a broken literal fails as a whole) but
//! lenient about shape: each list element is checked on its own, and a bad
//! element is reported as a [`VehicleIssue`] instead of sinking its siblings.

use std::fmt;

use serde::{Deserialize, Deserializer};
use serde_json::{Map, Number, Value};
use thiserror::Error;

/// One vehicle involved in an accident. Unknown keys are ignored.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct VehicleEntry {
    #[serde(rename = "VehicleNumber", default, deserialize_with = "lenient_int")]
    pub vehicle_number: Option<i64>,
    #[serde(rename = "Make", default, deserialize_with = "lenient_text")]
    pub make: Option<String>,
    #[serde(rename = "Model", default, deserialize_with = "lenient_text")]
    pub model: Option<String>,
    #[serde(rename = "SerialNumber", default, deserialize_with = "lenient_text")]
    pub serial_number: Option<String>,
    #[serde(rename = "AircraftCategory", default, deserialize_with = "lenient_text")]
    pub aircraft_category: Option<String>,
    #[serde(rename = "OperatorName", default, deserialize_with = "lenient_text")]
    pub operator_name: Option<String>,
}

/// A single list element that could not be turned into a [`VehicleEntry`].
#[derive(Debug, Clone, PartialEq)]
pub struct VehicleIssue {
    /// 0-based position in the list.
    pub index: usize,
    pub reason: String,
}

impl fmt::Display for VehicleIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "vehicle #{}: {}", self.index, self.reason)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct VehicleParse {
    pub vehicles: Vec<VehicleEntry>,
    pub issues: Vec<VehicleIssue>,
}

#[derive(Error, Debug, Clone, PartialEq)]
#[error("{reason} at offset {offset}")]
pub struct VehicleParseError {
    pub offset: usize,
    pub reason: String,
}

/// Parse the textual vehicle list. Blank input is an empty list.
pub fn parse_vehicles(raw: &str) -> Result<VehicleParse, VehicleParseError> {
    if raw.trim().is_empty() {
        return Ok(VehicleParse::default());
    }

    let value = LiteralParser::new(raw).parse_document()?;
    let items = match value {
        Value::Array(items) => items,
        other => {
            return Err(VehicleParseError {
                offset: 0,
                reason: format!("expected a list of vehicles, found {}", kind(&other)),
            })
        }
    };

    let mut parse = VehicleParse::default();
    for (index, item) in items.into_iter().enumerate() {
        if !item.is_object() {
            parse.issues.push(VehicleIssue {
                index,
                reason: format!("expected a mapping, found {}", kind(&item)),
            });
            continue;
        }
        match serde_json::from_value::<VehicleEntry>(item) {
            Ok(vehicle) => parse.vehicles.push(vehicle),
            Err(e) => parse.issues.push(VehicleIssue {
                index,
                reason: e.to_string(),
            }),
        }
    }
    Ok(parse)
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "a mapping",
    }
}

// --- Field coercion ---

fn lenient_int<'de, D: Deserializer<'de>>(d: D) -> Result<Option<i64>, D::Error> {
    use serde::de::Error;

    match Option::<Value>::deserialize(d)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => number_to_int(&n)
            .map(Some)
            .ok_or_else(|| D::Error::custom(format!("VehicleNumber {n} is not an integer"))),
        Some(Value::String(s)) => {
            let s = s.trim();
            if s.is_empty() {
                return Ok(None);
            }
            s.parse::<i64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().and_then(integral))
                .map(Some)
                .ok_or_else(|| D::Error::custom(format!("VehicleNumber '{s}' is not an integer")))
        }
        Some(other) => Err(D::Error::custom(format!(
            "VehicleNumber must be an integer, found {}",
            kind(&other)
        ))),
    }
}

fn lenient_text<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
    use serde::de::Error;

    match Option::<Value>::deserialize(d)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => {
            let s = s.trim();
            Ok((!s.is_empty()).then(|| s.to_string()))
        }
        Some(Value::Number(n)) => Ok(Some(n.to_string())),
        Some(Value::Bool(b)) => Ok(Some(b.to_string())),
        Some(other) => Err(D::Error::custom(format!(
            "expected text, found {}",
            kind(&other)
        ))),
    }
}

fn number_to_int(n: &Number) -> Option<i64> {
    n.as_i64().or_else(|| n.as_f64().and_then(integral))
}

/// Whole, in-range floats only; `f as i64` would saturate silently.
pub(crate) fn integral(f: f64) -> Option<i64> {
    (f.is_finite() && f.fract() == 0.0 && f.abs() < i64::MAX as f64).then_some(f as i64)
}

// --- Literal parser ---

/// Deepest list/mapping nesting accepted, same as serde_json.
const MAX_DEPTH: usize = 128;

struct LiteralParser<'a> {
    src: &'a str,
    pos: usize,
    depth: usize,
}

impl<'a> LiteralParser<'a> {
    fn new(src: &'a str) -> Self {
        Self { src, pos: 0, depth: 0 }
    }

    fn parse_document(mut self) -> Result<Value, VehicleParseError> {
        self.skip_ws();
        let value = self.value()?;
        self.skip_ws();
        if self.pos < self.src.len() {
            return Err(self.error("unexpected trailing characters"));
        }
        Ok(value)
    }

    fn error(&self, reason: impl Into<String>) -> VehicleParseError {
        VehicleParseError {
            offset: self.pos,
            reason: reason.into(),
        }
    }

    fn peek(&self) -> Option<char> {
        self.src[self.pos..].chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn skip_ws(&mut self) {
        while matches!(self.peek(), Some(c) if c.is_whitespace()) {
            self.bump();
        }
    }

    fn expect(&mut self, want: char) -> Result<(), VehicleParseError> {
        match self.peek() {
            Some(c) if c == want => {
                self.bump();
                Ok(())
            }
            Some(c) => Err(self.error(format!("expected '{want}', found '{c}'"))),
            None => Err(self.error(format!("expected '{want}', found end of input"))),
        }
    }

    fn value(&mut self) -> Result<Value, VehicleParseError> {
        match self.peek() {
            Some('[') => self.nested(|p| p.sequence(']')),
            Some('(') => self.nested(|p| p.sequence(')')),
            Some('{') => self.nested(Self::mapping),
            Some('\'') | Some('"') => self.string().map(Value::String),
            Some(c) if c.is_ascii_digit() || matches!(c, '-' | '+' | '.') => self.number(),
            Some(c) if c.is_alphabetic() || c == '_' => self.word(),
            Some(c) => Err(self.error(format!("unexpected character '{c}'"))),
            None => Err(self.error("unexpected end of input")),
        }
    }

    fn nested(
        &mut self,
        parse: impl FnOnce(&mut Self) -> Result<Value, VehicleParseError>,
    ) -> Result<Value, VehicleParseError> {
        if self.depth >= MAX_DEPTH {
            return Err(self.error("nesting too deep"));
        }
        self.depth += 1;
        let value = parse(self);
        self.depth -= 1;
        value
    }

    /// List or tuple. Trailing commas are allowed, as in Python.
    fn sequence(&mut self, close: char) -> Result<Value, VehicleParseError> {
        self.bump();
        let mut items = Vec::new();
        loop {
            self.skip_ws();
            if self.peek() == Some(close) {
                self.bump();
                break;
            }
            items.push(self.value()?);
            self.skip_ws();
            match self.peek() {
                Some(',') => {
                    self.bump();
                }
                Some(c) if c == close => {
                    self.bump();
                    break;
                }
                Some(c) => {
                    return Err(self.error(format!("expected ',' or '{close}', found '{c}'")))
                }
                None => {
                    return Err(self.error(format!("unclosed sequence, expected '{close}'")))
                }
            }
        }
        Ok(Value::Array(items))
    }

    fn mapping(&mut self) -> Result<Value, VehicleParseError> {
        self.bump();
        let mut map = Map::new();
        loop {
            self.skip_ws();
            if self.peek() == Some('}') {
                self.bump();
                break;
            }
            let key = match self.peek() {
                Some('\'') | Some('"') => self.string()?,
                Some(c) if c.is_ascii_digit() || c == '-' => self.number()?.to_string(),
                Some(c) => {
                    return Err(self.error(format!("mapping keys must be strings, found '{c}'")))
                }
                None => return Err(self.error("unclosed mapping, expected '}'")),
            };
            self.skip_ws();
            self.expect(':')?;
            self.skip_ws();
            let value = self.value()?;
            map.insert(key, value);
            self.skip_ws();
            match self.peek() {
                Some(',') => {
                    self.bump();
                }
                Some('}') => {
                    self.bump();
                    break;
                }
                Some(c) => return Err(self.error(format!("expected ',' or '}}', found '{c}'"))),
                None => return Err(self.error("unclosed mapping, expected '}'")),
            }
        }
        Ok(Value::Object(map))
    }

    fn string(&mut self) -> Result<String, VehicleParseError> {
        let start = self.pos;
        let quote = self.bump().ok_or_else(|| self.error("expected string"))?;
        let mut out = String::new();
        loop {
            let c = match self.bump() {
                Some(c) => c,
                None => {
                    return Err(VehicleParseError {
                        offset: start,
                        reason: "unterminated string".to_string(),
                    })
                }
            };
            if c == quote {
                return Ok(out);
            }
            if c != '\\' {
                out.push(c);
                continue;
            }
            match self.bump() {
                Some('n') => out.push('\n'),
                Some('t') => out.push('\t'),
                Some('r') => out.push('\r'),
                Some('0') => out.push('\0'),
                Some('\\') => out.push('\\'),
                Some('\'') => out.push('\''),
                Some('"') => out.push('"'),
                Some('/') => out.push('/'),
                Some('x') => out.push(self.hex_escape(2)?),
                Some('u') => out.push(self.unicode_escape()?),
                // Python keeps unknown escapes verbatim.
                Some(other) => {
                    out.push('\\');
                    out.push(other);
                }
                None => {
                    return Err(VehicleParseError {
                        offset: start,
                        reason: "unterminated string".to_string(),
                    })
                }
            }
        }
    }

    fn hex_escape(&mut self, digits: usize) -> Result<char, VehicleParseError> {
        let code = self.hex_code(digits)?;
        char::from_u32(code).ok_or_else(|| self.error("invalid escape sequence"))
    }

    /// `\uXXXX`, joining a UTF-16 surrogate pair (`\ud83d\ude00`) into one char.
    fn unicode_escape(&mut self) -> Result<char, VehicleParseError> {
        let high = self.hex_code(4)?;
        if !(0xD800..0xDC00).contains(&high) {
            return char::from_u32(high).ok_or_else(|| self.error("invalid escape sequence"));
        }
        if !self.src[self.pos..].starts_with("\\u") {
            return Err(self.error("unpaired surrogate in escape sequence"));
        }
        self.pos += 2;
        let low = self.hex_code(4)?;
        if !(0xDC00..0xE000).contains(&low) {
            return Err(self.error("unpaired surrogate in escape sequence"));
        }
        let code = 0x10000 + ((high - 0xD800) << 10) + (low - 0xDC00);
        char::from_u32(code).ok_or_else(|| self.error("invalid escape sequence"))
    }

    fn hex_code(&mut self, digits: usize) -> Result<u32, VehicleParseError> {
        let end = self.pos + digits;
        let hex = self
            .src
            .get(self.pos..end)
            .ok_or_else(|| self.error("truncated escape sequence"))?;
        let code =
            u32::from_str_radix(hex, 16).map_err(|_| self.error("invalid escape sequence"))?;
        self.pos = end;
        Ok(code)
    }

    fn number(&mut self) -> Result<Value, VehicleParseError> {
        let start = self.pos;
        while matches!(
            self.peek(),
            Some(c) if c.is_ascii_alphanumeric() || matches!(c, '-' | '+' | '.' | '_')
        ) {
            self.bump();
        }
        let text: String = self.src[start..self.pos].chars().filter(|c| *c != '_').collect();

        if let Ok(i) = text.parse::<i64>() {
            return Ok(Value::Number(i.into()));
        }
        match text.parse::<f64>() {
            // nan/inf have no JSON representation; treat them as absent
            Ok(f) => Ok(Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null)),
            Err(_) => Err(VehicleParseError {
                offset: start,
                reason: format!("invalid number '{text}'"),
            }),
        }
    }

    fn word(&mut self) -> Result<Value, VehicleParseError> {
        let start = self.pos;
        while matches!(self.peek(), Some(c) if c.is_alphanumeric() || c == '_') {
            self.bump();
        }
        match &self.src[start..self.pos] {
            "None" | "null" | "nan" | "NaN" => Ok(Value::Null),
            "True" | "true" => Ok(Value::Bool(true)),
            "False" | "false" => Ok(Value::Bool(false)),
            other => Err(VehicleParseError {
                offset: start,
                reason: format!("unexpected identifier '{other}'"),
            }),
        }
    }
}
