use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;

use crate::value::{MethodCall, Response, Value};

/// Serialize a `<methodCall>` document for a request or outbound callback.
pub fn encode_method_call(call: &MethodCall) -> String {
    let mut writer = Writer::new(Vec::new());
    write_decl(&mut writer);

    write_start(&mut writer, "methodCall");
    write_text_element(&mut writer, "methodName", &call.name);
    write_params(&mut writer, &call.params);
    write_end(&mut writer, "methodCall");

    into_string(writer)
}

/// Serialize a successful `<methodResponse>` carrying a single value.
pub fn encode_response_ok(value: &Value) -> String {
    let mut writer = Writer::new(Vec::new());
    write_decl(&mut writer);

    write_start(&mut writer, "methodResponse");
    write_params(&mut writer, std::slice::from_ref(value));
    write_end(&mut writer, "methodResponse");

    into_string(writer)
}

/// Serialize a fault `<methodResponse>`.
pub fn encode_response_fault(resp: &Response) -> String {
    let (code, message) = match resp {
        Response::Fault { code, message } => (*code, message.as_str()),
        Response::Value(_) => panic!("encode_response_fault called with a non-fault response"),
    };

    let mut writer = Writer::new(Vec::new());
    write_decl(&mut writer);

    write_start(&mut writer, "methodResponse");
    write_start(&mut writer, "fault");
    write_start(&mut writer, "value");
    write_start(&mut writer, "struct");

    write_member(&mut writer, "faultCode", &Value::Int(code));
    write_member(&mut writer, "faultString", &Value::String(message.to_string()));

    write_end(&mut writer, "struct");
    write_end(&mut writer, "value");
    write_end(&mut writer, "fault");
    write_end(&mut writer, "methodResponse");

    into_string(writer)
}

fn write_params(writer: &mut Writer<Vec<u8>>, params: &[Value]) {
    if params.is_empty() {
        writer
            .write_event(Event::Empty(BytesStart::new("params")))
            .expect("writing to an in-memory buffer cannot fail");
        return;
    }

    write_start(writer, "params");
    for value in params {
        write_start(writer, "param");
        write_start(writer, "value");
        write_value(writer, value);
        write_end(writer, "value");
        write_end(writer, "param");
    }
    write_end(writer, "params");
}

fn write_member(writer: &mut Writer<Vec<u8>>, name: &str, value: &Value) {
    write_start(writer, "member");
    write_text_element(writer, "name", name);
    write_start(writer, "value");
    write_value(writer, value);
    write_end(writer, "value");
    write_end(writer, "member");
}

fn write_value(writer: &mut Writer<Vec<u8>>, value: &Value) {
    match value {
        Value::Int(i) => write_text_element(writer, "i4", &i.to_string()),
        Value::Bool(b) => write_text_element(writer, "boolean", if *b { "1" } else { "0" }),
        Value::String(s) => write_text_element(writer, "string", s),
        Value::Double(d) => write_text_element(writer, "double", &format_double(*d)),
        Value::DateTime(dt) => {
            write_text_element(writer, "dateTime.iso8601", &dt.format("%Y%m%dT%H:%M:%S").to_string())
        }
        Value::Base64(bytes) => write_text_element(writer, "base64", &base64_encode(bytes)),
        Value::Array(values) => {
            write_start(writer, "array");
            if values.is_empty() {
                writer
                    .write_event(Event::Empty(BytesStart::new("data")))
                    .expect("writing to an in-memory buffer cannot fail");
            } else {
                write_start(writer, "data");
                for v in values {
                    write_start(writer, "value");
                    write_value(writer, v);
                    write_end(writer, "value");
                }
                write_end(writer, "data");
            }
            write_end(writer, "array");
        }
        Value::Struct(members) => {
            write_start(writer, "struct");
            for (name, v) in members {
                write_member(writer, name, v);
            }
            write_end(writer, "struct");
        }
    }
}

fn format_double(d: f64) -> String {
    if d.fract() == 0.0 && d.is_finite() {
        format!("{d:.1}")
    } else {
        d.to_string()
    }
}

/// Encode base64, wrapping at 76 characters with CRLF, matching the line
/// length servers in this protocol family emit.
fn base64_encode(bytes: &[u8]) -> String {
    use base64::Engine;
    let raw = base64::engine::general_purpose::STANDARD.encode(bytes);
    let mut wrapped = String::with_capacity(raw.len() + raw.len() / 76 * 2);
    for (i, chunk) in raw.as_bytes().chunks(76).enumerate() {
        if i > 0 {
            wrapped.push_str("\r\n");
        }
        wrapped.push_str(std::str::from_utf8(chunk).expect("base64 alphabet is ASCII"));
    }
    wrapped
}

fn write_decl(writer: &mut Writer<Vec<u8>>) {
    writer
        .write_event(Event::Decl(BytesDecl::new("1.0", Some("utf-8"), None)))
        .expect("writing to an in-memory buffer cannot fail");
}

fn write_start(writer: &mut Writer<Vec<u8>>, tag: &str) {
    writer
        .write_event(Event::Start(BytesStart::new(tag)))
        .expect("writing to an in-memory buffer cannot fail");
}

fn write_end(writer: &mut Writer<Vec<u8>>, tag: &str) {
    writer
        .write_event(Event::End(BytesEnd::new(tag)))
        .expect("writing to an in-memory buffer cannot fail");
}

fn write_text_element(writer: &mut Writer<Vec<u8>>, tag: &str, text: &str) {
    write_start(writer, tag);
    writer
        .write_event(Event::Text(BytesText::new(text)))
        .expect("writing to an in-memory buffer cannot fail");
    write_end(writer, tag);
}

fn into_string(writer: Writer<Vec<u8>>) -> String {
    String::from_utf8(writer.into_inner()).expect("writer only ever emits well-formed utf-8")
}
