use std::collections::HashSet;
use std::fmt;

use indexmap::IndexMap;
use serde_json::{Map, Value, json};

use crate::SchemaError;

/// One step in a [`FieldPath`]: an object key or an array index.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PathSegment {
    Key(String),
    Index(usize),
}

/// Location of a value inside a parsed output, rooted at the output field name.
///
/// Displays as `result.count` for object keys and `items[2].name` for array
/// elements, so a [`ValidationError`](crate::ValidationError) always points at
/// the exact value that failed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct FieldPath {
    parts: Vec<PathSegment>,
}

impl FieldPath {
    pub fn new(parts: impl IntoIterator<Item = PathSegment>) -> Self {
        Self {
            parts: parts.into_iter().collect(),
        }
    }

    /// Path pointing at a top-level output field.
    pub fn root(field: impl Into<String>) -> Self {
        Self {
            parts: vec![PathSegment::Key(field.into())],
        }
    }

    pub fn key(&self, key: impl Into<String>) -> Self {
        let mut path = self.clone();
        path.parts.push(PathSegment::Key(key.into()));
        path
    }

    pub fn index(&self, index: usize) -> Self {
        let mut path = self.clone();
        path.parts.push(PathSegment::Index(index));
        path
    }

    pub fn iter(&self) -> impl Iterator<Item = &PathSegment> + '_ {
        self.parts.iter()
    }

    /// The output field this path starts at, if any.
    pub fn field(&self) -> Option<&str> {
        match self.parts.first() {
            Some(PathSegment::Key(key)) => Some(key),
            _ => None,
        }
    }

    pub fn display(&self) -> String {
        self.to_string()
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.parts.is_empty() {
            return write!(f, "<root>");
        }
        for (i, part) in self.parts.iter().enumerate() {
            match part {
                PathSegment::Key(key) if i == 0 => write!(f, "{key}")?,
                PathSegment::Key(key) => write!(f, ".{key}")?,
                PathSegment::Index(index) => write!(f, "[{index}]")?,
            }
        }
        Ok(())
    }
}

/// What an object schema does with keys it does not declare.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum AdditionalProperties {
    /// Unknown keys pass through untouched.
    #[default]
    Allowed,
    /// Unknown keys are a validation error (`additionalProperties: false`).
    Forbidden,
    /// Unknown keys are map entries validated against this schema.
    Schema(Box<TypeSchema>),
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ObjectSchema {
    pub properties: IndexMap<String, TypeSchema>,
    pub required: Vec<String>,
    pub additional_properties: AdditionalProperties,
}

impl ObjectSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn property(mut self, name: impl Into<String>, schema: TypeSchema) -> Self {
        self.properties.insert(name.into(), schema);
        self
    }

    /// Declares a property and marks it required.
    pub fn required_property(mut self, name: impl Into<String>, schema: TypeSchema) -> Self {
        let name = name.into();
        self.required.push(name.clone());
        self.properties.insert(name, schema);
        self
    }

    pub fn strict(mut self) -> Self {
        self.additional_properties = AdditionalProperties::Forbidden;
        self
    }

    pub fn is_required(&self, name: &str) -> bool {
        self.required.iter().any(|required| required == name)
    }
}

/// JSON-Schema-like type descriptor attached to typed output fields.
///
/// Covers the subset the validator understands: primitives, objects (with
/// required keys and additional-property policy), arrays, enums, and unions.
/// Build it directly, from a JSON-Schema document via
/// [`from_json_schema`](TypeSchema::from_json_schema), or from a Rust type via
/// [`of`](TypeSchema::of).
#[derive(Debug, Clone, PartialEq)]
pub enum TypeSchema {
    Any,
    Null,
    String,
    Integer,
    Number,
    Boolean,
    Enum(Vec<Value>),
    Array(Box<TypeSchema>),
    Object(ObjectSchema),
    AnyOf(Vec<TypeSchema>),
}

impl TypeSchema {
    pub fn array(items: TypeSchema) -> Self {
        TypeSchema::Array(Box::new(items))
    }

    pub fn nullable(inner: TypeSchema) -> Self {
        TypeSchema::AnyOf(vec![inner, TypeSchema::Null])
    }

    pub fn string_enum<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        TypeSchema::Enum(values.into_iter().map(|v| Value::String(v.into())).collect())
    }

    /// Derives the descriptor from a type's `schemars` schema.
    pub fn of<T: schemars::JsonSchema>() -> Result<Self, SchemaError> {
        let schema = schemars::schema_for!(T);
        Self::from_json_schema(schema.as_value())
    }

    /// Parses a JSON-Schema document. Local `$ref`s into `$defs` or
    /// `definitions` are inlined; recursive references are rejected.
    pub fn from_json_schema(document: &Value) -> Result<Self, SchemaError> {
        let mut resolver = RefResolver {
            root: document,
            active: HashSet::new(),
        };
        resolver.convert(document)
    }

    /// Renders the descriptor back to a JSON-Schema document for prompts.
    pub fn to_json_schema(&self) -> Value {
        match self {
            TypeSchema::Any => json!({}),
            TypeSchema::Null => json!({ "type": "null" }),
            TypeSchema::String => json!({ "type": "string" }),
            TypeSchema::Integer => json!({ "type": "integer" }),
            TypeSchema::Number => json!({ "type": "number" }),
            TypeSchema::Boolean => json!({ "type": "boolean" }),
            TypeSchema::Enum(values) => json!({ "enum": values }),
            TypeSchema::Array(items) => json!({ "type": "array", "items": items.to_json_schema() }),
            TypeSchema::Object(object) => {
                let mut out = Map::new();
                out.insert("type".into(), json!("object"));
                if !object.properties.is_empty() {
                    let properties = object
                        .properties
                        .iter()
                        .map(|(name, schema)| (name.clone(), schema.to_json_schema()))
                        .collect::<Map<_, _>>();
                    out.insert("properties".into(), Value::Object(properties));
                }
                if !object.required.is_empty() {
                    out.insert("required".into(), json!(object.required));
                }
                match &object.additional_properties {
                    AdditionalProperties::Allowed => {}
                    AdditionalProperties::Forbidden => {
                        out.insert("additionalProperties".into(), json!(false));
                    }
                    AdditionalProperties::Schema(values) => {
                        out.insert("additionalProperties".into(), values.to_json_schema());
                    }
                }
                Value::Object(out)
            }
            TypeSchema::AnyOf(variants) => {
                let variants = variants.iter().map(TypeSchema::to_json_schema).collect::<Vec<_>>();
                json!({ "anyOf": variants })
            }
        }
    }

    /// Short type name used in prompt field listings.
    pub fn type_name(&self) -> String {
        match self {
            TypeSchema::Any => "any".to_string(),
            TypeSchema::Null => "null".to_string(),
            TypeSchema::String => "string".to_string(),
            TypeSchema::Integer => "integer".to_string(),
            TypeSchema::Number => "number".to_string(),
            TypeSchema::Boolean => "boolean".to_string(),
            TypeSchema::Enum(_) => "enum".to_string(),
            TypeSchema::Array(items) => format!("array of {}", items.type_name()),
            TypeSchema::Object(_) => "object".to_string(),
            TypeSchema::AnyOf(variants) => variants
                .iter()
                .map(TypeSchema::type_name)
                .collect::<Vec<_>>()
                .join(" or "),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, TypeSchema::Null)
    }
}

struct RefResolver<'a> {
    root: &'a Value,
    active: HashSet<String>,
}

impl<'a> RefResolver<'a> {
    fn convert(&mut self, schema: &'a Value) -> Result<TypeSchema, SchemaError> {
        let object = match schema {
            Value::Bool(true) => return Ok(TypeSchema::Any),
            Value::Object(object) => object,
            other => {
                return Err(SchemaError::Malformed {
                    reason: format!("expected a schema object, found {other}"),
                });
            }
        };

        if let Some(reference) = object.get("$ref") {
            return self.convert_ref(reference);
        }
        if let Some(constant) = object.get("const") {
            return Ok(TypeSchema::Enum(vec![constant.clone()]));
        }
        if let Some(values) = object.get("enum") {
            let values = values.as_array().ok_or_else(|| SchemaError::Malformed {
                reason: "`enum` must be an array".to_string(),
            })?;
            return Ok(TypeSchema::Enum(values.clone()));
        }
        for keyword in ["anyOf", "oneOf"] {
            if let Some(variants) = object.get(keyword) {
                return self.convert_union(keyword, variants);
            }
        }
        if let Some(all_of) = object.get("allOf") {
            return match all_of.as_array().map(Vec::as_slice) {
                Some([single]) => self.convert(single),
                _ => Err(SchemaError::Unsupported {
                    keyword: "allOf".to_string(),
                }),
            };
        }

        match object.get("type") {
            Some(Value::String(name)) => self.convert_typed(name, object),
            Some(Value::Array(names)) => {
                let mut variants = Vec::with_capacity(names.len());
                for name in names {
                    let name = name.as_str().ok_or_else(|| SchemaError::Malformed {
                        reason: "`type` entries must be strings".to_string(),
                    })?;
                    variants.push(self.convert_typed(name, object)?);
                }
                Ok(collapse_union(variants))
            }
            Some(other) => Err(SchemaError::Malformed {
                reason: format!("`type` must be a string or array, found {other}"),
            }),
            None if object.contains_key("properties") => self.convert_typed("object", object),
            None if object.contains_key("items") => self.convert_typed("array", object),
            None => Ok(TypeSchema::Any),
        }
    }

    fn convert_typed(
        &mut self,
        name: &str,
        object: &'a Map<String, Value>,
    ) -> Result<TypeSchema, SchemaError> {
        match name {
            "string" => Ok(TypeSchema::String),
            "integer" => Ok(TypeSchema::Integer),
            "number" => Ok(TypeSchema::Number),
            "boolean" => Ok(TypeSchema::Boolean),
            "null" => Ok(TypeSchema::Null),
            "array" => {
                let items = match object.get("items") {
                    Some(items) => self.convert(items)?,
                    None => TypeSchema::Any,
                };
                Ok(TypeSchema::array(items))
            }
            "object" => self.convert_object(object),
            other => Err(SchemaError::UnknownType {
                name: other.to_string(),
            }),
        }
    }

    fn convert_object(
        &mut self,
        object: &'a Map<String, Value>,
    ) -> Result<TypeSchema, SchemaError> {
        let mut schema = ObjectSchema::new();

        if let Some(properties) = object.get("properties") {
            let properties = properties.as_object().ok_or_else(|| SchemaError::Malformed {
                reason: "`properties` must be an object".to_string(),
            })?;
            for (name, property) in properties {
                schema.properties.insert(name.clone(), self.convert(property)?);
            }
        }

        if let Some(required) = object.get("required") {
            let required = required.as_array().ok_or_else(|| SchemaError::Malformed {
                reason: "`required` must be an array".to_string(),
            })?;
            for name in required {
                let name = name.as_str().ok_or_else(|| SchemaError::Malformed {
                    reason: "`required` entries must be strings".to_string(),
                })?;
                schema.required.push(name.to_string());
            }
        }

        schema.additional_properties = match object.get("additionalProperties") {
            None | Some(Value::Bool(true)) => AdditionalProperties::Allowed,
            Some(Value::Bool(false)) => AdditionalProperties::Forbidden,
            Some(values) => AdditionalProperties::Schema(Box::new(self.convert(values)?)),
        };

        Ok(TypeSchema::Object(schema))
    }

    fn convert_union(&mut self, keyword: &str, variants: &'a Value) -> Result<TypeSchema, SchemaError> {
        let variants = variants.as_array().ok_or_else(|| SchemaError::Malformed {
            reason: format!("`{keyword}` must be an array"),
        })?;
        let converted = variants
            .iter()
            .map(|variant| self.convert(variant))
            .collect::<Result<Vec<_>, _>>()?;

        // `oneOf` over constants is how schemars renders documented unit enums.
        if converted.iter().all(|variant| matches!(variant, TypeSchema::Enum(_))) {
            let values = converted
                .into_iter()
                .flat_map(|variant| match variant {
                    TypeSchema::Enum(values) => values,
                    _ => Vec::new(),
                })
                .collect();
            return Ok(TypeSchema::Enum(values));
        }

        Ok(collapse_union(converted))
    }

    fn convert_ref(&mut self, reference: &'a Value) -> Result<TypeSchema, SchemaError> {
        let reference = reference.as_str().ok_or_else(|| SchemaError::Malformed {
            reason: "`$ref` must be a string".to_string(),
        })?;
        let root = self.root;
        let target = ["#/$defs/", "#/definitions/"]
            .into_iter()
            .find_map(|prefix: &str| {
                let name = reference.strip_prefix(prefix)?;
                let container = &prefix[2..prefix.len() - 1];
                root.get(container)?.get(name)
            })
            .ok_or_else(|| SchemaError::UnresolvedRef {
                reference: reference.to_string(),
            })?;

        if !self.active.insert(reference.to_string()) {
            return Err(SchemaError::RecursiveRef {
                reference: reference.to_string(),
            });
        }
        let converted = self.convert(target);
        self.active.remove(reference);
        converted
    }
}

fn collapse_union(mut variants: Vec<TypeSchema>) -> TypeSchema {
    if variants.len() == 1 {
        variants.remove(0)
    } else {
        TypeSchema::AnyOf(variants)
    }
}
