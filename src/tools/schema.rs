//! Declared argument schemas, checked before a handler runs

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArgumentType {
    String,
    Integer,
    Boolean,
    Array,
    Object,
}

impl ArgumentType {
    fn as_str(&self) -> &'static str {
        match self {
            ArgumentType::String => "string",
            ArgumentType::Integer => "integer",
            ArgumentType::Boolean => "boolean",
            ArgumentType::Array => "array",
            ArgumentType::Object => "object",
        }
    }

    fn accepts(&self, value: &Value) -> bool {
        match self {
            ArgumentType::String => value.is_string(),
            ArgumentType::Integer => value.is_i64() || value.is_u64(),
            ArgumentType::Boolean => value.is_boolean(),
            ArgumentType::Array => value.is_array(),
            ArgumentType::Object => value.is_object(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArgumentField {
    pub name: String,
    pub kind: ArgumentType,
    pub description: String,
    pub required: bool,
    /// Element type for arrays
    #[serde(skip_serializing_if = "Option::is_none")]
    pub items: Option<ArgumentType>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArgumentSchema {
    fields: Vec<ArgumentField>,
}

impl ArgumentSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn required(self, name: &str, kind: ArgumentType, description: &str) -> Self {
        self.field(name, kind, description, true, None)
    }

    pub fn optional(self, name: &str, kind: ArgumentType, description: &str) -> Self {
        self.field(name, kind, description, false, None)
    }

    pub fn optional_list(self, name: &str, items: ArgumentType, description: &str) -> Self {
        self.field(name, ArgumentType::Array, description, false, Some(items))
    }

    fn field(
        mut self,
        name: &str,
        kind: ArgumentType,
        description: &str,
        required: bool,
        items: Option<ArgumentType>,
    ) -> Self {
        self.fields.push(ArgumentField {
            name: name.to_string(),
            kind,
            description: description.to_string(),
            required,
            items,
        });
        self
    }

    pub fn fields(&self) -> &[ArgumentField] {
        &self.fields
    }

    /// Checks required fields and the type of every declared field present.
    /// Undeclared fields are rejected so typos surface instead of being ignored.
    pub fn validate(&self, arguments: &Map<String, Value>) -> Result<(), String> {
        for field in &self.fields {
            match arguments.get(&field.name) {
                None | Some(Value::Null) if field.required => {
                    return Err(format!("missing required argument '{}'", field.name));
                }
                None | Some(Value::Null) => {}
                Some(value) => {
                    if !field.kind.accepts(value) {
                        return Err(format!(
                            "argument '{}' must be of type {}",
                            field.name,
                            field.kind.as_str()
                        ));
                    }
                    if let (Some(items), Value::Array(values)) = (field.items, value) {
                        if values.iter().any(|v| !items.accepts(v)) {
                            return Err(format!(
                                "argument '{}' must contain only {} values",
                                field.name,
                                items.as_str()
                            ));
                        }
                    }
                }
            }
        }

        if let Some(unknown) = arguments
            .keys()
            .find(|key| !self.fields.iter().any(|f| &f.name == *key))
        {
            return Err(format!("unknown argument '{}'", unknown));
        }

        Ok(())
    }

    /// JSON Schema handed to the reasoning service as the tool's parameters
    pub fn to_json_schema(&self) -> Value {
        let mut properties = Map::new();
        for field in &self.fields {
            let mut property = json!({
                "type": field.kind.as_str(),
                "description": field.description,
            });
            if let Some(items) = field.items {
                property["items"] = json!({ "type": items.as_str() });
            }
            properties.insert(field.name.clone(), property);
        }
        let required: Vec<&str> = self
            .fields
            .iter()
            .filter(|f| f.required)
            .map(|f| f.name.as_str())
            .collect();

        json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> ArgumentSchema {
        ArgumentSchema::new()
            .required("target", ArgumentType::String, "Contract path")
            .optional_list("args", ArgumentType::String, "Extra arguments")
            .optional("timeout", ArgumentType::Integer, "Seconds")
    }

    fn args(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_accepts_valid_arguments() {
        assert!(schema()
            .validate(&args(json!({"target": "A.sol", "args": ["--json", "-"]})))
            .is_ok());
        assert!(schema().validate(&args(json!({"target": "A.sol"}))).is_ok());
    }

    #[test]
    fn test_rejects_invalid_arguments() {
        let s = schema();
        assert!(s
            .validate(&args(json!({})))
            .unwrap_err()
            .contains("missing required argument 'target'"));
        assert!(s
            .validate(&args(json!({"target": 3})))
            .unwrap_err()
            .contains("type string"));
        assert!(s
            .validate(&args(json!({"target": "A.sol", "args": [1]})))
            .unwrap_err()
            .contains("only string"));
        assert!(s
            .validate(&args(json!({"target": "A.sol", "tagret": "B.sol"})))
            .unwrap_err()
            .contains("unknown argument 'tagret'"));
    }

    #[test]
    fn test_json_schema() {
        let schema = schema().to_json_schema();
        assert_eq!(schema["type"], "object");
        assert_eq!(schema["required"], json!(["target"]));
        assert_eq!(schema["properties"]["args"]["items"]["type"], "string");
    }
}
