use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Int64,
    String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDescriptor {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    pub nullable: bool,
}

impl FieldDescriptor {
    fn new(name: &str, field_type: FieldType, nullable: bool) -> Self {
        Self {
            name: name.to_string(),
            field_type,
            nullable,
        }
    }
}

/// Row shape sent to the sink once per append session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowSchema {
    pub name: String,
    pub fields: Vec<FieldDescriptor>,
}

impl RowSchema {
    /// Descriptor for [`healthprobe_common::Row`].
    pub fn health_check() -> Self {
        Self {
            name: "HealthCheck".to_string(),
            fields: vec![
                FieldDescriptor::new("timestamp", FieldType::Int64, false),
                FieldDescriptor::new("target", FieldType::String, false),
                FieldDescriptor::new("kind", FieldType::String, true),
                FieldDescriptor::new("address", FieldType::String, true),
                FieldDescriptor::new("latency_micros", FieldType::Int64, false),
                FieldDescriptor::new("error", FieldType::String, true),
            ],
        }
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.name.as_str())
    }
}
