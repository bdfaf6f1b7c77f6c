//! MiniJinja filters available to manifest templates
//!
//! Names and behaviour follow the Helm functions of the same name so
//! existing snippets carry over.

use base64::Engine as _;
use minijinja::{Environment, Error, ErrorKind, Value};

fn invalid(message: impl Into<String>) -> Error {
    Error::new(ErrorKind::InvalidOperation, message.into())
}

fn to_json(value: &Value) -> Result<serde_json::Value, Error> {
    serde_json::to_value(value).map_err(|e| invalid(e.to_string()))
}

/// Register every filter on `env`
pub fn register(env: &mut Environment<'_>) {
    env.add_filter("toyaml", toyaml);
    env.add_filter("tojson", tojson);
    env.add_filter("b64encode", b64encode);
    env.add_filter("b64decode", b64decode);
    env.add_filter("quote", quote);
    env.add_filter("indent", indent);
    env.add_filter("nindent", nindent);
    env.add_filter("required", required);
}

/// `{{ values.labels | toyaml }}`, without document marker or trailing newline
pub fn toyaml(value: Value) -> Result<String, Error> {
    let yaml = serde_yaml::to_string(&to_json(&value)?).map_err(|e| invalid(e.to_string()))?;
    Ok(yaml.trim_start_matches("---\n").trim_end().to_string())
}

pub fn tojson(value: Value) -> Result<String, Error> {
    serde_json::to_string(&to_json(&value)?).map_err(|e| invalid(e.to_string()))
}

pub fn b64encode(value: String) -> String {
    base64::engine::general_purpose::STANDARD.encode(value)
}

pub fn b64decode(value: String) -> Result<String, Error> {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(value.trim())
        .map_err(|e| invalid(format!("invalid base64: {}", e)))?;
    String::from_utf8(bytes).map_err(|e| invalid(format!("decoded value is not UTF-8: {}", e)))
}

/// Double-quote, escaping backslashes and quotes
pub fn quote(value: Value) -> String {
    let raw = match value.as_str() {
        Some(s) => s.to_string(),
        None => value.to_string(),
    };
    format!("\"{}\"", raw.replace('\\', "\\\\").replace('"', "\\\""))
}

/// Prefix every non-empty line with `spaces` spaces
pub fn indent(value: String, spaces: usize) -> String {
    let pad = " ".repeat(spaces);
    value
        .lines()
        .map(|line| {
            if line.is_empty() {
                String::new()
            } else {
                format!("{}{}", pad, line)
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Like `indent`, starting with a newline
pub fn nindent(value: String, spaces: usize) -> String {
    format!("\n{}", indent(value, spaces))
}

/// Fail rendering when the value is undefined, none or an empty string
pub fn required(value: Value, message: Option<String>) -> Result<Value, Error> {
    let missing = value.is_undefined() || value.is_none() || value.as_str() == Some("");
    if missing {
        return Err(invalid(
            message.unwrap_or_else(|| "required value is missing".to_string()),
        ));
    }
    Ok(value)
}
