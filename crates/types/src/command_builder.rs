//! Renders an execution container's command line from an experiment's CLI contract and a
//! batch's resolved inputs. Ported from the reference implementation's
//! `cc_core/commons/command_builder.py`.

use serde_json::Value;

use crate::experiment::{CliArgument, InputCategory};

#[derive(Debug, thiserror::Error)]
pub enum CommandBuilderError {
    #[error("required argument \"{0}\" is missing")]
    MissingRequiredArgument(String),
    #[error("for input key \"{0}\": description defines an array, but value is not a list")]
    NotAList(String),
}

/// Builds the full command (base command + rendered arguments) for a batch's execution
/// container. Arguments are rendered in position order: positional arguments first (sorted by
/// their declared binding position), then named arguments.
pub fn generate_command(
    base_command: &[String],
    cli_arguments: &[CliArgument],
    values: &std::collections::HashMap<String, Value>,
) -> Result<Vec<String>, CommandBuilderError> {
    let mut sorted_arguments: Vec<&CliArgument> = cli_arguments.iter().collect();
    sorted_arguments.sort_by_key(|arg| arg.position);

    let mut command = base_command.to_vec();
    for argument in sorted_arguments {
        let value = values.get(&argument.input_key);
        command.extend(create_execution_argument(argument, value)?);
    }
    Ok(command)
}

fn render_scalar(category: InputCategory, value: &Value) -> String {
    match category {
        InputCategory::File | InputCategory::Directory => value
            .as_object()
            .and_then(|o| o.get("path"))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        InputCategory::String => value.as_str().unwrap_or_default().to_string(),
        InputCategory::Boolean => value.as_bool().unwrap_or(false).to_string(),
        InputCategory::Int | InputCategory::Long => value
            .as_i64()
            .map(|v| v.to_string())
            .unwrap_or_else(|| value.to_string()),
        InputCategory::Float | InputCategory::Double => value
            .as_f64()
            .map(|v| v.to_string())
            .unwrap_or_else(|| value.to_string()),
    }
}

fn create_argument_list(argument: &CliArgument, value: &Value) -> Result<Vec<String>, CommandBuilderError> {
    let category = argument.input_type.category;

    if argument.input_type.is_array {
        let items = value
            .as_array()
            .ok_or_else(|| CommandBuilderError::NotAList(argument.input_key.clone()))?;

        if category == InputCategory::Boolean {
            // Boolean arrays are only rendered at all when an item separator is given.
            return Ok(if argument.item_separator.is_some() {
                items.iter().map(|v| render_scalar(category, v)).collect()
            } else {
                Vec::new()
            });
        }
        return Ok(items.iter().map(|v| render_scalar(category, v)).collect());
    }

    // Scalar booleans render nothing positionally; their presence/absence is the prefix itself.
    if category == InputCategory::Boolean {
        return Ok(Vec::new());
    }
    Ok(vec![render_scalar(category, value)])
}

fn create_execution_argument(
    argument: &CliArgument,
    value: Option<&Value>,
) -> Result<Vec<String>, CommandBuilderError> {
    let Some(value) = value else {
        return if argument.input_type.is_optional {
            Ok(Vec::new())
        } else {
            Err(CommandBuilderError::MissingRequiredArgument(argument.input_key.clone()))
        };
    };

    let mut argument_list = create_argument_list(argument, value)?;

    if let (false, Some(separator)) = (argument_list.is_empty(), &argument.item_separator) {
        argument_list = vec![argument_list.join(separator)];
    }

    Ok(argument_list_to_execution_argument(argument_list, argument, value))
}

fn argument_list_to_execution_argument(
    argument_list: Vec<String>,
    argument: &CliArgument,
    value: &Value,
) -> Vec<String> {
    let Some(prefix) = &argument.prefix else {
        return argument_list;
    };

    let is_array = argument.input_type.is_array;
    let is_boolean = argument.input_type.category == InputCategory::Boolean;

    let mut do_separate = argument.separate;
    if is_array && argument.item_separator.is_none() {
        do_separate = true;
    }

    let mut should_add_prefix = true;
    if is_array && value.as_array().map_or(true, |a| a.is_empty()) {
        should_add_prefix = false;
    }
    if is_boolean && !value.as_bool().unwrap_or(false) {
        should_add_prefix = false;
    }

    if !should_add_prefix {
        return Vec::new();
    }

    if do_separate {
        let mut result = vec![prefix.clone()];
        result.extend(argument_list);
        result
    } else if argument_list.is_empty() {
        vec![prefix.clone()]
    } else {
        vec![format!("{prefix}{}", argument_list[0])]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::experiment::{ArgumentPosition, InputType};
    use maplit::hashmap;

    fn positional(key: &str, position: i64, category: InputCategory) -> CliArgument {
        CliArgument {
            input_key: key.to_string(),
            position: ArgumentPosition::Positional(position),
            input_type: InputType { category, is_array: false, is_optional: false },
            prefix: None,
            separate: false,
            item_separator: None,
        }
    }

    fn named(key: &str, category: InputCategory, prefix: &str, separate: bool) -> CliArgument {
        CliArgument {
            input_key: key.to_string(),
            position: ArgumentPosition::Named,
            input_type: InputType { category, is_array: false, is_optional: false },
            prefix: Some(prefix.to_string()),
            separate,
            item_separator: None,
        }
    }

    #[test]
    fn renders_positional_before_named() {
        let args = vec![
            named("flag", InputCategory::String, "--flag=", false),
            positional("first", 0, InputCategory::String),
        ];
        let values = hashmap! {
            "first".to_string() => Value::String("hello".into()),
            "flag".to_string() => Value::String("world".into()),
        };
        let command = generate_command(&["echo".to_string()], &args, &values).unwrap();
        assert_eq!(command, vec!["echo", "hello", "--flag=world"]);
    }

    #[test]
    fn missing_required_argument_errors() {
        let args = vec![positional("first", 0, InputCategory::String)];
        let values = std::collections::HashMap::new();
        assert!(generate_command(&[], &args, &values).is_err());
    }

    #[test]
    fn missing_optional_argument_is_skipped() {
        let mut arg = positional("first", 0, InputCategory::String);
        arg.input_type.is_optional = true;
        let values = std::collections::HashMap::new();
        let command = generate_command(&["run".to_string()], &[arg], &values).unwrap();
        assert_eq!(command, vec!["run"]);
    }

    #[test]
    fn separated_named_flag() {
        let arg = named("verbose", InputCategory::String, "--out", true);
        let values = hashmap! { "verbose".to_string() => Value::String("x".into()) };
        let command = generate_command(&[], &[arg], &values).unwrap();
        assert_eq!(command, vec!["--out", "x"]);
    }

    #[test]
    fn joined_named_flag() {
        let arg = named("verbose", InputCategory::String, "--out=", false);
        let values = hashmap! { "verbose".to_string() => Value::String("x".into()) };
        let command = generate_command(&[], &[arg], &values).unwrap();
        assert_eq!(command, vec!["--out=x"]);
    }

    #[test]
    fn file_input_renders_path() {
        let arg = positional("f", 0, InputCategory::File);
        let values = hashmap! { "f".to_string() => serde_json::json!({"path": "/cc/in.txt"}) };
        let command = generate_command(&[], &[arg], &values).unwrap();
        assert_eq!(command, vec!["/cc/in.txt"]);
    }
}
