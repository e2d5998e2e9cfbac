//! JSON encode/decode built-ins.
//!
//! The codec is hand-rolled over the runtime value model: nil <-> null,
//! numbers, booleans, interned strings, arrays and string-keyed hashmaps.

use std::collections::HashSet;

use claw_runtime::objects::{array, hashmap, NativeError};
use claw_runtime::string_pool::intern;
use claw_runtime::value::{format_number, Value};
use claw_runtime::Interpreter;

use crate::{define, want_string};

pub fn register(interp: &Interpreter) {
    define(interp, "jsonEncode", 1, native_json_encode);
    define(interp, "jsonDecode", 1, native_json_decode);
}

fn native_json_encode(_: &mut Interpreter, args: &[Value]) -> Result<Value, NativeError> {
    let mut out = String::new();
    let mut visited = HashSet::new();
    encode_value(args[0], &mut out, &mut visited)?;
    Ok(Value::string(intern(&out)))
}

fn encode_value(
    v: Value,
    out: &mut String,
    visited: &mut HashSet<usize>,
) -> Result<(), NativeError> {
    if v.is_nil() {
        out.push_str("null");
        return Ok(());
    }
    if v.is_bool() {
        out.push_str(if v.as_bool() { "true" } else { "false" });
        return Ok(());
    }
    if v.is_number() {
        let n = v.as_number();
        if !n.is_finite() {
            return Err(NativeError::type_mismatch(
                "jsonEncode() cannot encode a non-finite number.",
            ));
        }
        out.push_str(&format_number(n));
        return Ok(());
    }
    if v.is_string() {
        encode_string(v.as_str().as_str(), out);
        return Ok(());
    }
    if v.is_array() {
        let obj = v.as_object();
        if !visited.insert(obj.addr()) {
            return Err(NativeError::type_mismatch(
                "jsonEncode() cannot encode a cyclic structure.",
            ));
        }
        out.push('[');
        for (i, e) in array::snapshot(obj).into_iter().enumerate() {
            if i > 0 {
                out.push(',');
            }
            encode_value(e, out, visited)?;
        }
        out.push(']');
        visited.remove(&obj.addr());
        return Ok(());
    }
    if v.is_map() {
        let obj = v.as_object();
        if !visited.insert(obj.addr()) {
            return Err(NativeError::type_mismatch(
                "jsonEncode() cannot encode a cyclic structure.",
            ));
        }
        out.push('{');
        for (i, (k, e)) in hashmap::entries(obj).into_iter().enumerate() {
            if i > 0 {
                out.push(',');
            }
            encode_string(&k, out);
            out.push(':');
            encode_value(e, out, visited)?;
        }
        out.push('}');
        visited.remove(&obj.addr());
        return Ok(());
    }
    Err(NativeError::type_mismatch(
        "jsonEncode() supports nil, bool, number, string, array and hashmap.",
    ))
}

fn encode_string(s: &str, out: &mut String) {
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            c if (c as u32) < 0x20 => out.push_str(&format!("\\u{:04x}", c as u32)),
            c => out.push(c),
        }
    }
    out.push('"');
}

fn native_json_decode(_: &mut Interpreter, args: &[Value]) -> Result<Value, NativeError> {
    let text = want_string(args, 0, "jsonDecode()")?;
    let mut parser = JsonParser {
        bytes: text.as_bytes(),
        pos: 0,
    };
    parser.skip_ws();
    let v = parser.value()?;
    parser.skip_ws();
    if parser.pos != parser.bytes.len() {
        return Err(invalid("trailing characters"));
    }
    Ok(v)
}

fn invalid(what: &str) -> NativeError {
    NativeError::type_mismatch(format!("jsonDecode(): invalid JSON ({}).", what))
}

struct JsonParser<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl JsonParser<'_> {
    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn skip_ws(&mut self) {
        while matches!(self.peek(), Some(b' ' | b'\t' | b'\n' | b'\r')) {
            self.pos += 1;
        }
    }

    fn eat(&mut self, expected: u8) -> Result<(), NativeError> {
        if self.peek() == Some(expected) {
            self.pos += 1;
            Ok(())
        } else {
            Err(invalid("unexpected character"))
        }
    }

    fn literal(&mut self, text: &str, v: Value) -> Result<Value, NativeError> {
        if self.bytes[self.pos..].starts_with(text.as_bytes()) {
            self.pos += text.len();
            Ok(v)
        } else {
            Err(invalid("bad literal"))
        }
    }

    fn value(&mut self) -> Result<Value, NativeError> {
        match self.peek() {
            Some(b'n') => self.literal("null", Value::nil()),
            Some(b't') => self.literal("true", Value::boolean(true)),
            Some(b'f') => self.literal("false", Value::boolean(false)),
            Some(b'"') => self.string().map(|s| Value::string(intern(&s))),
            Some(b'[') => self.array(),
            Some(b'{') => self.object(),
            Some(c) if c == b'-' || c.is_ascii_digit() => self.number(),
            _ => Err(invalid("unexpected end of input")),
        }
    }

    fn number(&mut self) -> Result<Value, NativeError> {
        let start = self.pos;
        if self.peek() == Some(b'-') {
            self.pos += 1;
        }
        while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
            self.pos += 1;
        }
        if self.peek() == Some(b'.') {
            self.pos += 1;
            while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
                self.pos += 1;
            }
        }
        if matches!(self.peek(), Some(b'e' | b'E')) {
            self.pos += 1;
            if matches!(self.peek(), Some(b'+' | b'-')) {
                self.pos += 1;
            }
            while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
                self.pos += 1;
            }
        }
        let text = std::str::from_utf8(&self.bytes[start..self.pos]).expect("ascii number");
        text.parse::<f64>()
            .map(Value::number)
            .map_err(|_| invalid("bad number"))
    }

    fn string(&mut self) -> Result<String, NativeError> {
        self.eat(b'"')?;
        let mut out = String::new();
        loop {
            match self.peek() {
                None => return Err(invalid("unterminated string")),
                Some(b'"') => {
                    self.pos += 1;
                    return Ok(out);
                }
                Some(b'\\') => {
                    self.pos += 1;
                    match self.peek() {
                        Some(b'"') => out.push('"'),
                        Some(b'\\') => out.push('\\'),
                        Some(b'/') => out.push('/'),
                        Some(b'n') => out.push('\n'),
                        Some(b't') => out.push('\t'),
                        Some(b'r') => out.push('\r'),
                        Some(b'b') => out.push('\u{0008}'),
                        Some(b'f') => out.push('\u{000c}'),
                        Some(b'u') => {
                            if self.pos + 4 >= self.bytes.len() {
                                return Err(invalid("bad unicode escape"));
                            }
                            let hex =
                                std::str::from_utf8(&self.bytes[self.pos + 1..self.pos + 5])
                                    .map_err(|_| invalid("bad unicode escape"))?;
                            let code = u32::from_str_radix(hex, 16)
                                .map_err(|_| invalid("bad unicode escape"))?;
                            out.push(char::from_u32(code).unwrap_or('\u{fffd}'));
                            self.pos += 4;
                        }
                        _ => return Err(invalid("bad escape")),
                    }
                    self.pos += 1;
                }
                Some(_) => {
                    // Consume one UTF-8 character.
                    let rest = std::str::from_utf8(&self.bytes[self.pos..])
                        .map_err(|_| invalid("bad utf-8"))?;
                    let c = rest.chars().next().expect("non-empty");
                    out.push(c);
                    self.pos += c.len_utf8();
                }
            }
        }
    }

    fn array(&mut self) -> Result<Value, NativeError> {
        self.eat(b'[')?;
        let mut items = Vec::new();
        self.skip_ws();
        if self.peek() == Some(b']') {
            self.pos += 1;
            return Ok(Value::object(array::create(items)));
        }
        loop {
            self.skip_ws();
            items.push(self.value()?);
            self.skip_ws();
            match self.peek() {
                Some(b',') => self.pos += 1,
                Some(b']') => {
                    self.pos += 1;
                    return Ok(Value::object(array::create(items)));
                }
                _ => return Err(invalid("expected ',' or ']'")),
            }
        }
    }

    fn object(&mut self) -> Result<Value, NativeError> {
        self.eat(b'{')?;
        let m = hashmap::create();
        self.skip_ws();
        if self.peek() == Some(b'}') {
            self.pos += 1;
            return Ok(Value::object(m));
        }
        loop {
            self.skip_ws();
            let key = self.string()?;
            self.skip_ws();
            self.eat(b':')?;
            self.skip_ws();
            let v = self.value()?;
            hashmap::set(m, &key, v);
            self.skip_ws();
            match self.peek() {
                Some(b',') => self.pos += 1,
                Some(b'}') => {
                    self.pos += 1;
                    return Ok(Value::object(m));
                }
                _ => return Err(invalid("expected ',' or '}'")),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::test_util::{call, interp};
    use claw_runtime::objects::{array, hashmap};
    use claw_runtime::string_pool::intern;
    use claw_runtime::value::Value;

    fn s(text: &str) -> Value {
        Value::string(intern(text))
    }

    #[test]
    fn test_encode_primitives() {
        let mut i = interp();
        assert_eq!(
            call(&mut i, "jsonEncode", &[Value::nil()]).unwrap().as_str().as_str(),
            "null"
        );
        assert_eq!(
            call(&mut i, "jsonEncode", &[Value::number(4.5)])
                .unwrap()
                .as_str()
                .as_str(),
            "4.5"
        );
        assert_eq!(
            call(&mut i, "jsonEncode", &[s("a\"b")]).unwrap().as_str().as_str(),
            r#""a\"b""#
        );
    }

    #[test]
    fn test_decode_nested() {
        let mut i = interp();
        let v = call(&mut i, "jsonDecode", &[s(r#"{"xs": [1, 2, 3], "ok": true}"#)]).unwrap();
        assert!(v.is_map());
        let xs = hashmap::get(v.as_object(), "xs");
        assert!(xs.is_array());
        assert_eq!(array::len(xs.as_object()), 3);
        assert_eq!(array::get(xs.as_object(), 2).unwrap().as_number(), 3.0);
        assert!(hashmap::get(v.as_object(), "ok").as_bool());
    }

    #[test]
    fn test_roundtrip() {
        let mut i = interp();
        let m = call(&mut i, "mapOf", &[s("k"), Value::number(1.0)]).unwrap();
        let text = call(&mut i, "jsonEncode", &[m]).unwrap();
        assert_eq!(text.as_str().as_str(), r#"{"k":1}"#);
        let back = call(&mut i, "jsonDecode", &[text]).unwrap();
        assert_eq!(hashmap::get(back.as_object(), "k").as_number(), 1.0);
    }

    #[test]
    fn test_decode_errors() {
        let mut i = interp();
        assert!(call(&mut i, "jsonDecode", &[s("{")]).is_err());
        assert!(call(&mut i, "jsonDecode", &[s("1 2")]).is_err());
        assert!(call(&mut i, "jsonDecode", &[s("tru")]).is_err());
    }

    #[test]
    fn test_encode_cycle_rejected() {
        let mut i = interp();
        let arr = call(&mut i, "arrayOf", &[]).unwrap();
        call(&mut i, "push", &[arr, arr]).unwrap();
        assert!(call(&mut i, "jsonEncode", &[arr]).is_err());
    }
}
