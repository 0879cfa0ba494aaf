/// Message descriptors: the schema-side view of a table
///
/// A `MessageDescriptor` is the single source of truth for one table. It
/// carries the field list in declaration order, the per-field and
/// per-message annotations, and name/tag lookup maps.
use crate::schema::annotation::{FieldAnnotation, MessageAnnotation};
use ahash::AHashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Scalar field kinds supported by the schema library.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScalarKind {
    Bool,
    Int32,
    Int64,
    UInt32,
    UInt64,
    Float,
    Double,
    Str,
    Bytes,
    Enum,
}

impl ScalarKind {
    /// Whether this kind is an unsigned integer.
    pub fn is_unsigned(self) -> bool {
        matches!(self, ScalarKind::UInt32 | ScalarKind::UInt64)
    }

    /// Whether this kind is any integer (enum values travel as int32).
    pub fn is_integer(self) -> bool {
        matches!(
            self,
            ScalarKind::Int32
                | ScalarKind::Int64
                | ScalarKind::UInt32
                | ScalarKind::UInt64
                | ScalarKind::Enum
        )
    }
}

/// Element kind of a repeated field or a map value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ElemKind {
    Scalar(ScalarKind),
    Message,
}

/// Field kind classification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldKind {
    /// Plain scalar
    Scalar(ScalarKind),
    /// Nested message stored as a JSON object column
    Message,
    /// Repeated scalar or repeated message
    Repeated(ElemKind),
    /// Map with a scalar key
    Map { key: ScalarKind, value: ElemKind },
}

impl FieldKind {
    pub fn is_repeated(&self) -> bool {
        matches!(self, FieldKind::Repeated(_))
    }

    pub fn is_map(&self) -> bool {
        matches!(self, FieldKind::Map { .. })
    }
}

/// One field of a message.
#[derive(Debug, Clone)]
pub struct FieldDescriptor {
    /// Field name, also the db column name
    pub name: String,
    /// Declared field number
    pub tag: u32,
    /// Kind classification
    pub kind: FieldKind,
    /// Descriptor of the nested message type, for message element kinds
    pub nested: Option<Arc<MessageDescriptor>>,
    /// Per-field annotation (empty record when the schema carries none)
    pub annotation: FieldAnnotation,
}

impl FieldDescriptor {
    pub fn new(name: impl Into<String>, tag: u32, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            tag,
            kind,
            nested: None,
            annotation: FieldAnnotation::default(),
        }
    }

    /// Attach the nested message type for message element kinds.
    pub fn nested(mut self, descriptor: Arc<MessageDescriptor>) -> Self {
        self.nested = Some(descriptor);
        self
    }

    /// Attach the field annotation.
    pub fn annotate(mut self, annotation: FieldAnnotation) -> Self {
        self.annotation = annotation;
        self
    }

    /// Descriptor of the nested message type, failing when the kind
    /// requires one but the schema did not supply it.
    pub fn nested_descriptor(&self) -> crate::Result<&Arc<MessageDescriptor>> {
        self.nested.as_ref().ok_or_else(|| {
            crate::MsgSqlError::UnknownField(format!(
                "field '{}' has no nested message descriptor",
                self.name
            ))
        })
    }
}

/// A message type: named, ordered fields plus annotations.
#[derive(Debug)]
pub struct MessageDescriptor {
    /// Message name, also the db table name
    pub name: String,
    /// Field definitions (declaration order)
    pub fields: Vec<FieldDescriptor>,
    /// Per-message annotation
    pub annotation: MessageAnnotation,
    /// Field name -> index in `fields`
    name_index: AHashMap<String, usize>,
    /// Field tag -> index in `fields`
    tag_index: AHashMap<u32, usize>,
}

impl MessageDescriptor {
    /// Create a new message descriptor.
    pub fn new(name: impl Into<String>, fields: Vec<FieldDescriptor>) -> Self {
        let mut name_index = AHashMap::new();
        let mut tag_index = AHashMap::new();
        for (i, field) in fields.iter().enumerate() {
            name_index.insert(field.name.clone(), i);
            tag_index.insert(field.tag, i);
        }

        Self {
            name: name.into(),
            fields,
            annotation: MessageAnnotation::default(),
            name_index,
            tag_index,
        }
    }

    /// Attach the message annotation.
    pub fn with_annotation(mut self, annotation: MessageAnnotation) -> Self {
        self.annotation = annotation;
        self
    }

    /// Get field by name.
    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.name_index.get(name).map(|&i| &self.fields[i])
    }

    /// Get field by declared tag.
    pub fn field_by_tag(&self, tag: u32) -> Option<&FieldDescriptor> {
        self.tag_index.get(&tag).map(|&i| &self.fields[i])
    }

    /// Number of declared fields.
    pub fn field_count(&self) -> usize {
        self.fields.len()
    }
}
