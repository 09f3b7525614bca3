use cc_broker::SecretMap;
use serde_json::Value;

/// Walks `value` replacing any JSON string that names a key present in `secrets` with that
/// secret's plaintext value. Batches and experiments hold opaque broker keys in place of
/// protected values (spec.md §3 "Secret envelope"); this is the substitution the owning proxy
/// performs into a deep copy right before a batch launches.
pub(crate) fn substitute_secrets(value: &Value, secrets: &SecretMap) -> Value {
    match value {
        Value::String(s) => secrets.get(s).cloned().unwrap_or_else(|| value.clone()),
        Value::Array(items) => Value::Array(items.iter().map(|item| substitute_secrets(item, secrets)).collect()),
        Value::Object(map) => {
            Value::Object(map.iter().map(|(k, v)| (k.clone(), substitute_secrets(v, secrets))).collect())
        }
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use maplit::hashmap;

    #[test]
    fn replaces_matching_string_leaves() {
        let secrets = hashmap! { "secret-key-1".to_string() => serde_json::json!({"password": "hunter2"}) };
        let value = serde_json::json!({"auth": "secret-key-1", "path": "/data/in.csv"});
        let resolved = substitute_secrets(&value, &secrets);
        assert_eq!(resolved["auth"]["password"], "hunter2");
        assert_eq!(resolved["path"], "/data/in.csv");
    }

    #[test]
    fn recurses_into_arrays() {
        let secrets = hashmap! { "k".to_string() => Value::from(42) };
        let value = serde_json::json!(["k", "other"]);
        let resolved = substitute_secrets(&value, &secrets);
        assert_eq!(resolved, serde_json::json!([42, "other"]));
    }
}
