use chrono::NaiveDateTime;
use indexmap::IndexMap;
use quick_xml::events::Event;
use quick_xml::Reader;

use crate::error::Error;
use crate::value::{MethodCall, Response, Value};

/// Parse a `<methodCall>` document: a client request, or a server-initiated
/// callback when read off a handle with the high bit clear.
pub fn decode_method_call(input: &str) -> Result<MethodCall, Error> {
    let mut reader = Reader::from_str(input);
    reader.config_mut().trim_text(true);
    skip_decl(&mut reader)?;

    expect_start(&mut reader, b"methodCall")?;
    expect_start(&mut reader, b"methodName")?;
    let name = read_text_until_end(&mut reader, b"methodName")?;

    let params = read_params(&mut reader)?;
    expect_end(&mut reader, b"methodCall")?;

    Ok(MethodCall { name, params })
}

/// Parse a `<methodResponse>` document: either a single value or a fault.
pub fn decode_response(input: &str) -> Result<Response, Error> {
    let mut reader = Reader::from_str(input);
    reader.config_mut().trim_text(true);
    skip_decl(&mut reader)?;

    expect_start(&mut reader, b"methodResponse")?;
    let resp = match next_event(&mut reader)? {
        Event::Start(e) if name_is(&e, b"params") => {
            let mut values = read_params_body(&mut reader)?;
            if values.len() != 1 {
                return Err(Error::Decode(format!(
                    "expected exactly one <param> in methodResponse, got {}",
                    values.len()
                )));
            }
            Response::Value(values.remove(0))
        }
        Event::Start(e) if name_is(&e, b"fault") => {
            expect_start(&mut reader, b"value")?;
            let value = read_value(&mut reader)?;
            expect_end(&mut reader, b"value")?;
            expect_end(&mut reader, b"fault")?;
            match value {
                Value::Struct(members) => {
                    let code = match members.get("faultCode") {
                        Some(Value::Int(c)) => *c,
                        other => {
                            return Err(Error::Decode(format!(
                                "fault struct missing integer faultCode: {other:?}"
                            )))
                        }
                    };
                    let message = match members.get("faultString") {
                        Some(Value::String(s)) => s.clone(),
                        other => {
                            return Err(Error::Decode(format!(
                                "fault struct missing string faultString: {other:?}"
                            )))
                        }
                    };
                    Response::Fault { code, message }
                }
                other => {
                    return Err(Error::Decode(format!(
                        "fault value was not a struct: {other:?}"
                    )))
                }
            }
        }
        ev => return unexpected(ev, "<params> or <fault>"),
    };

    expect_end(&mut reader, b"methodResponse")?;
    Ok(resp)
}

fn read_params(reader: &mut Reader<&[u8]>) -> Result<Vec<Value>, Error> {
    match next_event(reader)? {
        Event::Empty(e) if name_is(&e, b"params") => Ok(Vec::new()),
        Event::Start(e) if name_is(&e, b"params") => read_params_body(reader),
        ev => unexpected(ev, "<params>"),
    }
}

fn read_params_body(reader: &mut Reader<&[u8]>) -> Result<Vec<Value>, Error> {
    let mut values = Vec::new();
    loop {
        match next_event(reader)? {
            Event::Start(e) if name_is(&e, b"param") => {
                expect_start(reader, b"value")?;
                let value = read_value(reader)?;
                expect_end(reader, b"value")?;
                expect_end(reader, b"param")?;
                values.push(value);
            }
            Event::Empty(e) if name_is(&e, b"param") => {
                return Err(Error::Decode("<param/> has no <value>".to_string()));
            }
            Event::End(e) if name_is(&e, b"params") => break,
            ev => return unexpected(ev, "<param> or </params>"),
        }
    }
    Ok(values)
}

fn read_value(reader: &mut Reader<&[u8]>) -> Result<Value, Error> {
    match next_event(reader)? {
        Event::Empty(e) if name_is(&e, b"string") => Ok(Value::String(String::new())),
        Event::Empty(e) if name_is(&e, b"array") => Ok(Value::Array(Vec::new())),
        Event::Empty(e) if name_is(&e, b"struct") => Ok(Value::Struct(IndexMap::new())),
        Event::Start(e) if name_is(&e, b"i4") => {
            let text = read_text_until_end(reader, b"i4")?;
            parse_i4(&text)
        }
        Event::Start(e) if name_is(&e, b"int") => {
            let text = read_text_until_end(reader, b"int")?;
            parse_i4(&text)
        }
        Event::Start(e) if name_is(&e, b"boolean") => {
            let text = read_text_until_end(reader, b"boolean")?;
            match text.as_str() {
                "0" => Ok(Value::Bool(false)),
                "1" => Ok(Value::Bool(true)),
                other => Err(Error::Decode(format!(
                    "expected 0 or 1 for <boolean>, got {other:?}"
                ))),
            }
        }
        Event::Start(e) if name_is(&e, b"string") => {
            Ok(Value::String(read_text_until_end(reader, b"string")?))
        }
        Event::Start(e) if name_is(&e, b"double") => {
            let text = read_text_until_end(reader, b"double")?;
            text.parse::<f64>()
                .map(Value::Double)
                .map_err(|e| Error::Decode(format!("invalid <double> {text:?}: {e}")))
        }
        Event::Start(e) if name_is(&e, b"dateTime.iso8601") => {
            let text = read_text_until_end(reader, b"dateTime.iso8601")?;
            parse_date_time(&text)
        }
        Event::Start(e) if name_is(&e, b"base64") => {
            let text = read_text_until_end(reader, b"base64")?;
            base64_decode(&text).map(Value::Base64)
        }
        Event::Start(e) if name_is(&e, b"array") => read_array(reader),
        Event::Start(e) if name_is(&e, b"struct") => read_struct(reader),
        // Bare text directly inside <value>, with no leaf tag: the XML-RPC
        // convention is to treat it as a string. The caller still consumes
        // the closing </value>, same as every other arm.
        Event::Text(t) => decode_text(&t).map(Value::String),
        ev => unexpected(
            ev,
            "<i4>, <int>, <boolean>, <string>, <double>, <dateTime.iso8601>, <base64>, <array> or <struct>",
        ),
    }
}

fn read_array(reader: &mut Reader<&[u8]>) -> Result<Value, Error> {
    match next_event(reader)? {
        Event::Empty(e) if name_is(&e, b"data") => {
            expect_end(reader, b"array")?;
            return Ok(Value::Array(Vec::new()));
        }
        Event::Start(e) if name_is(&e, b"data") => {}
        ev => return unexpected(ev, "<data>"),
    }

    let mut values = Vec::new();
    loop {
        match next_event(reader)? {
            Event::Start(e) if name_is(&e, b"value") => {
                let v = read_value(reader)?;
                expect_end(reader, b"value")?;
                values.push(v);
            }
            Event::Empty(e) if name_is(&e, b"value") => {
                values.push(Value::String(String::new()));
            }
            Event::End(e) if name_is(&e, b"data") => break,
            ev => return unexpected(ev, "<value> or </data>"),
        }
    }
    expect_end(reader, b"array")?;
    Ok(Value::Array(values))
}

fn read_struct(reader: &mut Reader<&[u8]>) -> Result<Value, Error> {
    let mut members = IndexMap::new();
    loop {
        match next_event(reader)? {
            Event::Start(e) if name_is(&e, b"member") => {
                expect_start(reader, b"name")?;
                let member_name = read_text_until_end(reader, b"name")?;
                expect_start(reader, b"value")?;
                let value = read_value(reader)?;
                expect_end(reader, b"value")?;
                expect_end(reader, b"member")?;

                if members.contains_key(&member_name) {
                    log::warn!("duplicate <struct> member {member_name:?}, keeping last value");
                }
                members.insert(member_name, value);
            }
            Event::End(e) if name_is(&e, b"struct") => break,
            ev => return unexpected(ev, "<member> or </struct>"),
        }
    }
    Ok(Value::Struct(members))
}

fn parse_i4(text: &str) -> Result<Value, Error> {
    text.parse::<i32>()
        .map(Value::Int)
        .map_err(|e| Error::Decode(format!("invalid integer {text:?}: {e}")))
}

fn parse_date_time(text: &str) -> Result<Value, Error> {
    const FORMATS: &[&str] = &["%Y%m%dT%H:%M:%S", "%Y-%m-%dT%H:%M:%S"];
    for fmt in FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(text, fmt) {
            return Ok(Value::DateTime(dt));
        }
    }
    Err(Error::Decode(format!(
        "invalid <dateTime.iso8601> value {text:?}"
    )))
}

/// Decode base64, tolerating the server's MIME line-wrapping (76 chars, CRLF).
fn base64_decode(text: &str) -> Result<Vec<u8>, Error> {
    use base64::Engine;
    let stripped: String = text
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();
    base64::engine::general_purpose::STANDARD
        .decode(stripped)
        .map_err(|e| Error::Decode(format!("invalid <base64> payload: {e}")))
}

fn skip_decl(reader: &mut Reader<&[u8]>) -> Result<(), Error> {
    match next_event(reader)? {
        Event::Decl(_) => Ok(()),
        ev => unexpected(ev, "<?xml ... ?>"),
    }
}

fn expect_start(reader: &mut Reader<&[u8]>, tag: &[u8]) -> Result<(), Error> {
    match next_event(reader)? {
        Event::Start(e) if e.name().as_ref() == tag => Ok(()),
        ev => unexpected(ev, &format!("<{}>", String::from_utf8_lossy(tag))),
    }
}

fn expect_end(reader: &mut Reader<&[u8]>, tag: &[u8]) -> Result<(), Error> {
    match next_event(reader)? {
        Event::End(e) if e.name().as_ref() == tag => Ok(()),
        ev => unexpected(ev, &format!("</{}>", String::from_utf8_lossy(tag))),
    }
}

/// Read text content up to and including the matching end tag. Tolerates a
/// tag with no text content at all (immediate end tag).
fn read_text_until_end(reader: &mut Reader<&[u8]>, tag: &[u8]) -> Result<String, Error> {
    let mut out = String::new();
    loop {
        match next_event(reader)? {
            Event::Text(t) => out.push_str(&decode_text(&t)?),
            Event::CData(t) => {
                out.push_str(&String::from_utf8_lossy(&t.into_inner()));
            }
            Event::End(e) if e.name().as_ref() == tag => break,
            ev => return unexpected(ev, &format!("text or </{}>", String::from_utf8_lossy(tag))),
        }
    }
    Ok(out)
}

fn decode_text(t: &quick_xml::events::BytesText) -> Result<String, Error> {
    t.unescape()
        .map(|cow| cow.into_owned())
        .map_err(|e| Error::Decode(format!("invalid text content: {e}")))
}

fn name_is(e: &quick_xml::events::BytesStart, tag: &[u8]) -> bool {
    e.name().as_ref() == tag
}

fn next_event<'a>(reader: &mut Reader<&'a [u8]>) -> Result<Event<'a>, Error> {
    reader
        .read_event()
        .map_err(|e| Error::Decode(format!("XML parse error: {e}")))
}

fn unexpected<T>(event: Event, expected: &str) -> Result<T, Error> {
    Err(Error::Decode(format!(
        "unexpected XML event {event:?}, expected {expected}"
    )))
}
