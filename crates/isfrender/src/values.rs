//! Turns command-line text and TOML values into typed input values.
use isfdoc::{InputDecl, InputType};
use scene::InputValue;

/// Parses `raw` for the input declared by `decl`.
///
/// Accepted spellings: `true`/`false`/`1`/`0` for bools and events, an integer
/// or one of the declared `LABELS` for longs, `x,y` for points and
/// `r,g,b[,a]` for colors.
pub fn parse_value(decl: &InputDecl, raw: &str) -> Result<InputValue, String> {
    let raw = raw.trim();
    match decl.kind {
        InputType::Bool | InputType::Event => parse_bool(raw).map(InputValue::Bool),
        InputType::Long => parse_long(decl, raw).map(InputValue::Long),
        InputType::Float => raw
            .parse::<f64>()
            .map(InputValue::Float)
            .map_err(|_| format!("`{}` expects a number, got '{raw}'", decl.name)),
        InputType::Point2D => {
            let values = parse_list(raw)?;
            point(decl, &values)
        }
        InputType::Color => {
            let values = parse_list(raw)?;
            color(decl, &values)
        }
        InputType::Image | InputType::Audio | InputType::AudioFft => Err(format!(
            "`{}` is a {} input; bind it with --image",
            decl.name, decl.kind
        )),
    }
}

/// Converts a value from the config file's `[inputs]` table.
pub fn value_from_toml(decl: &InputDecl, value: &toml::Value) -> Result<InputValue, String> {
    match value {
        toml::Value::String(text) => parse_value(decl, text),
        toml::Value::Boolean(flag) => parse_value(decl, if *flag { "true" } else { "false" }),
        toml::Value::Integer(number) => parse_value(decl, &number.to_string()),
        toml::Value::Float(number) => parse_value(decl, &number.to_string()),
        toml::Value::Array(items) => {
            let values = items
                .iter()
                .map(|item| match item {
                    toml::Value::Integer(number) => Ok(*number as f64),
                    toml::Value::Float(number) => Ok(*number),
                    other => Err(format!("`{}` array holds a non-number: {other}", decl.name)),
                })
                .collect::<Result<Vec<_>, _>>()?;
            match decl.kind {
                InputType::Point2D => point(decl, &values),
                InputType::Color => color(decl, &values),
                _ => Err(format!("`{}` does not take an array", decl.name)),
            }
        }
        other => Err(format!("unsupported value for `{}`: {other}", decl.name)),
    }
}

fn parse_bool(raw: &str) -> Result<bool, String> {
    match raw.to_ascii_lowercase().as_str() {
        "true" | "on" | "yes" | "1" => Ok(true),
        "false" | "off" | "no" | "0" => Ok(false),
        _ => Err(format!("expected true or false, got '{raw}'")),
    }
}

fn parse_long(decl: &InputDecl, raw: &str) -> Result<i32, String> {
    if let Ok(value) = raw.parse::<i32>() {
        return Ok(value);
    }
    decl.labels
        .iter()
        .position(|label| label.eq_ignore_ascii_case(raw))
        .and_then(|index| decl.values.get(index))
        .and_then(|value| i32::try_from(*value).ok())
        .ok_or_else(|| format!("`{}` expects an integer or one of {:?}, got '{raw}'", decl.name, decl.labels))
}

fn parse_list(raw: &str) -> Result<Vec<f64>, String> {
    raw.split(',')
        .map(|part| {
            part.trim()
                .parse::<f64>()
                .map_err(|_| format!("invalid number '{}' in '{raw}'", part.trim()))
        })
        .collect()
}

fn point(decl: &InputDecl, values: &[f64]) -> Result<InputValue, String> {
    match values {
        [x, y] => Ok(InputValue::Point2D([*x, *y])),
        _ => Err(format!("`{}` expects two components (x,y)", decl.name)),
    }
}

fn color(decl: &InputDecl, values: &[f64]) -> Result<InputValue, String> {
    match values {
        [r, g, b] => Ok(InputValue::Color([*r, *g, *b, 1.0])),
        [r, g, b, a] => Ok(InputValue::Color([*r, *g, *b, *a])),
        _ => Err(format!("`{}` expects three or four components (r,g,b[,a])", decl.name)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decl(name: &str, kind: InputType) -> InputDecl {
        InputDecl {
            name: name.to_string(),
            kind,
            label: None,
            default: None,
            min: None,
            max: None,
            identity: None,
            values: Vec::new(),
            labels: Vec::new(),
        }
    }

    #[test]
    fn parses_text_by_declared_type() {
        assert_eq!(
            parse_value(&decl("on", InputType::Bool), "TRUE").unwrap(),
            InputValue::Bool(true)
        );
        assert_eq!(
            parse_value(&decl("level", InputType::Float), "0.25").unwrap(),
            InputValue::Float(0.25)
        );
        assert_eq!(
            parse_value(&decl("center", InputType::Point2D), "0.5, 1").unwrap(),
            InputValue::Point2D([0.5, 1.0])
        );
        assert_eq!(
            parse_value(&decl("tint", InputType::Color), "1,0,0").unwrap(),
            InputValue::Color([1.0, 0.0, 0.0, 1.0])
        );
        assert!(parse_value(&decl("tint", InputType::Color), "1,0").is_err());
        assert!(parse_value(&decl("src", InputType::Image), "a.png").is_err());
    }

    #[test]
    fn longs_accept_labels() {
        let mut mode = decl("mode", InputType::Long);
        mode.values = vec![0, 1, 2];
        mode.labels = vec!["Add".into(), "Multiply".into(), "Screen".into()];
        assert_eq!(parse_value(&mode, "screen").unwrap(), InputValue::Long(2));
        assert_eq!(parse_value(&mode, "1").unwrap(), InputValue::Long(1));
        assert!(parse_value(&mode, "overlay").is_err());
    }

    #[test]
    fn converts_toml_values() {
        let table: toml::Table = toml::from_str(
            r#"
            level = 1
            tint = [0.0, 0.5, 1, 0.5]
            flash = true
            "#,
        )
        .unwrap();
        assert_eq!(
            value_from_toml(&decl("level", InputType::Float), &table["level"]).unwrap(),
            InputValue::Float(1.0)
        );
        assert_eq!(
            value_from_toml(&decl("tint", InputType::Color), &table["tint"]).unwrap(),
            InputValue::Color([0.0, 0.5, 1.0, 0.5])
        );
        assert_eq!(
            value_from_toml(&decl("flash", InputType::Event), &table["flash"]).unwrap(),
            InputValue::Bool(true)
        );
        assert!(value_from_toml(&decl("level", InputType::Float), &table["tint"]).is_err());
    }
}
