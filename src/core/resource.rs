use serde_json::{Map, Value};

use crate::error::TemplateError;

#[derive(Debug, Clone, PartialEq)]
pub struct Resource {
    pub id: String,
    pub resource_type: String,
    pub properties: Map<String, Value>,
    pub metadata: Option<Map<String, Value>>,
    pub depends_on: Vec<String>,
}

impl Resource {
    pub fn new(id: impl Into<String>, resource_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            resource_type: resource_type.into(),
            properties: Map::new(),
            metadata: None,
            depends_on: Vec::new(),
        }
    }

    pub fn with_properties(mut self, properties: Value) -> Self {
        if let Value::Object(map) = properties {
            self.properties = map;
        }
        self
    }

    pub fn is_type(&self, types: &[&str]) -> bool {
        types.iter().any(|t| *t == self.resource_type)
    }

    // template shape, without the id
    pub fn declaration(&self) -> Value {
        let mut out = Map::new();
        out.insert("Type".to_string(), Value::String(self.resource_type.clone()));
        out.insert(
            "Properties".to_string(),
            Value::Object(self.properties.clone()),
        );
        if let Some(metadata) = &self.metadata {
            out.insert("Metadata".to_string(), Value::Object(metadata.clone()));
        }
        if !self.depends_on.is_empty() {
            out.insert(
                "DependsOn".to_string(),
                Value::Array(
                    self.depends_on
                        .iter()
                        .map(|d| Value::String(d.clone()))
                        .collect(),
                ),
            );
        }
        Value::Object(out)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Template {
    resources: Vec<Resource>,
}

impl Template {
    pub fn from_json_str(s: &str) -> Result<Self, TemplateError> {
        let value: Value = serde_json::from_str(s)?;
        Self::from_value(&value)
    }

    pub fn from_value(value: &Value) -> Result<Self, TemplateError> {
        let root = value.as_object().ok_or(TemplateError::NotAnObject)?;
        let Some(resources) = root.get("Resources") else {
            return Ok(Self::default());
        };
        let resources = resources
            .as_object()
            .ok_or(TemplateError::ResourcesNotAnObject)?;

        let mut out = Vec::with_capacity(resources.len());
        for (id, decl) in resources {
            out.push(parse_resource(id, decl)?);
        }
        Ok(Self { resources: out })
    }

    pub fn resources(&self) -> &[Resource] {
        &self.resources
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }
}

fn parse_resource(id: &str, decl: &Value) -> Result<Resource, TemplateError> {
    let malformed = |reason: &str| TemplateError::MalformedResource {
        id: id.to_string(),
        reason: reason.to_string(),
    };

    let decl = decl
        .as_object()
        .ok_or_else(|| malformed("declaration is not an object"))?;
    let resource_type = decl
        .get("Type")
        .and_then(Value::as_str)
        .filter(|t| !t.trim().is_empty())
        .ok_or_else(|| malformed("missing string `Type`"))?;

    let properties = match decl.get("Properties") {
        None | Some(Value::Null) => Map::new(),
        Some(Value::Object(map)) => map.clone(),
        Some(_) => return Err(malformed("`Properties` is not an object")),
    };
    let metadata = match decl.get("Metadata") {
        None | Some(Value::Null) => None,
        Some(Value::Object(map)) => Some(map.clone()),
        Some(_) => return Err(malformed("`Metadata` is not an object")),
    };
    let depends_on = match decl.get("DependsOn") {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::String(s)) => vec![s.clone()],
        Some(Value::Array(items)) => items
            .iter()
            .map(|v| v.as_str().map(str::to_string))
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| malformed("`DependsOn` must contain strings"))?,
        Some(_) => return Err(malformed("`DependsOn` must be a string or list")),
    };

    Ok(Resource {
        id: id.to_string(),
        resource_type: resource_type.to_string(),
        properties,
        metadata,
        depends_on,
    })
}
