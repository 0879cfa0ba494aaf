/// Dynamic message values
///
/// The codec operates over descriptors, not compile-time types, so a
/// message is a tag-indexed map of `MsgValue` paired with its descriptor.
/// Unset fields read as their kind's zero. JSON bridging lives here
/// because both the wire codec and the column codec serialize nested
/// values through the same field-kind-directed rules.
use crate::error::{MsgSqlError, Result};
use crate::schema::descriptor::{ElemKind, FieldDescriptor, FieldKind, MessageDescriptor, ScalarKind};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde_json::{Map as JsonMap, Value as Json};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Map key of a map field. Ordered so message equality and JSON output
/// are deterministic.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum MapKey {
    Bool(bool),
    Int(i64),
    Uint(u64),
    Str(String),
}

impl MapKey {
    /// Textual form used as the JSON object key.
    pub fn to_text(&self) -> String {
        match self {
            MapKey::Bool(b) => b.to_string(),
            MapKey::Int(i) => i.to_string(),
            MapKey::Uint(u) => u.to_string(),
            MapKey::Str(s) => s.clone(),
        }
    }

    /// Parse a textual key back into the declared key kind.
    pub fn parse(kind: ScalarKind, text: &str) -> Result<Self> {
        match kind {
            ScalarKind::Bool => match text {
                "true" | "1" => Ok(MapKey::Bool(true)),
                "false" | "0" => Ok(MapKey::Bool(false)),
                _ => Err(MsgSqlError::ValueParse(format!("bad bool map key '{text}'"))),
            },
            ScalarKind::Int32 | ScalarKind::Int64 | ScalarKind::Enum => text
                .parse::<i64>()
                .map(MapKey::Int)
                .map_err(|_| MsgSqlError::ValueParse(format!("bad int map key '{text}'"))),
            ScalarKind::UInt32 | ScalarKind::UInt64 => text
                .parse::<u64>()
                .map(MapKey::Uint)
                .map_err(|_| MsgSqlError::ValueParse(format!("bad uint map key '{text}'"))),
            ScalarKind::Str => Ok(MapKey::Str(text.to_string())),
            _ => Err(MsgSqlError::ValueParse(format!(
                "unsupported map key kind {kind:?}"
            ))),
        }
    }
}

/// A single field value.
#[derive(Debug, Clone, PartialEq)]
pub enum MsgValue {
    Bool(bool),
    I32(i32),
    I64(i64),
    U32(u32),
    U64(u64),
    F32(f32),
    F64(f64),
    Str(String),
    Bytes(Vec<u8>),
    List(Vec<MsgValue>),
    Map(BTreeMap<MapKey, MsgValue>),
    Msg(Message),
}

impl MsgValue {
    /// Whether this value is the zero of its shape.
    pub fn is_zero(&self) -> bool {
        match self {
            MsgValue::Bool(b) => !b,
            MsgValue::I32(v) => *v == 0,
            MsgValue::I64(v) => *v == 0,
            MsgValue::U32(v) => *v == 0,
            MsgValue::U64(v) => *v == 0,
            MsgValue::F32(v) => *v == 0.0,
            MsgValue::F64(v) => *v == 0.0,
            MsgValue::Str(s) => s.is_empty(),
            MsgValue::Bytes(b) => b.is_empty(),
            MsgValue::List(l) => l.is_empty(),
            MsgValue::Map(m) => m.is_empty(),
            MsgValue::Msg(_) => false,
        }
    }
}

/// Zero value of a field kind.
pub fn zero_value(kind: &FieldKind) -> MsgValue {
    match kind {
        FieldKind::Scalar(k) => zero_scalar(*k),
        FieldKind::Message => MsgValue::Map(BTreeMap::new()),
        FieldKind::Repeated(_) => MsgValue::List(Vec::new()),
        FieldKind::Map { .. } => MsgValue::Map(BTreeMap::new()),
    }
}

fn zero_scalar(kind: ScalarKind) -> MsgValue {
    match kind {
        ScalarKind::Bool => MsgValue::Bool(false),
        ScalarKind::Int32 => MsgValue::I32(0),
        ScalarKind::Int64 => MsgValue::I64(0),
        ScalarKind::UInt32 => MsgValue::U32(0),
        ScalarKind::UInt64 => MsgValue::U64(0),
        ScalarKind::Float => MsgValue::F32(0.0),
        ScalarKind::Double => MsgValue::F64(0.0),
        ScalarKind::Str => MsgValue::Str(String::new()),
        ScalarKind::Bytes => MsgValue::Bytes(Vec::new()),
        ScalarKind::Enum => MsgValue::I32(0),
    }
}

/// A message instance: descriptor plus tag-indexed values.
#[derive(Debug, Clone)]
pub struct Message {
    descriptor: Arc<MessageDescriptor>,
    values: BTreeMap<u32, MsgValue>,
}

impl PartialEq for Message {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.descriptor, &other.descriptor) && self.values == other.values
    }
}

impl Message {
    /// Create a fresh, empty message of the given type.
    pub fn new(descriptor: Arc<MessageDescriptor>) -> Self {
        Self {
            descriptor,
            values: BTreeMap::new(),
        }
    }

    pub fn descriptor(&self) -> &Arc<MessageDescriptor> {
        &self.descriptor
    }

    /// Set fields in tag order.
    pub fn values(&self) -> &BTreeMap<u32, MsgValue> {
        &self.values
    }

    /// Get a field value by tag.
    pub fn get(&self, tag: u32) -> Option<&MsgValue> {
        self.values.get(&tag)
    }

    /// Get a field value by name.
    pub fn get_by_name(&self, name: &str) -> Option<&MsgValue> {
        self.descriptor
            .field(name)
            .and_then(|f| self.values.get(&f.tag))
    }

    /// Set a field value by tag.
    pub fn set(&mut self, tag: u32, value: MsgValue) {
        self.values.insert(tag, value);
    }

    /// Set a field value by name.
    pub fn set_by_name(&mut self, name: &str, value: MsgValue) -> Result<()> {
        let field = self
            .descriptor
            .field(name)
            .ok_or_else(|| MsgSqlError::UnknownField(name.to_string()))?;
        self.values.insert(field.tag, value);
        Ok(())
    }

    /// Remove a field value by tag.
    pub fn clear(&mut self, tag: u32) {
        self.values.remove(&tag);
    }

    /// Value of a field, falling back to the kind's zero when unset.
    pub fn get_or_zero(&self, field: &FieldDescriptor) -> MsgValue {
        self.values
            .get(&field.tag)
            .cloned()
            .unwrap_or_else(|| zero_value(&field.kind))
    }

    /// Whether a field is unset or holds its kind's zero.
    pub fn is_zero(&self, field: &FieldDescriptor) -> bool {
        self.values.get(&field.tag).map_or(true, MsgValue::is_zero)
    }
}

/// Serialize a message to a JSON object keyed by field name. Only set
/// fields appear.
pub fn message_to_json(msg: &Message) -> Result<Json> {
    let mut obj = JsonMap::new();
    for field in &msg.descriptor().fields {
        if let Some(value) = msg.get(field.tag) {
            obj.insert(field.name.clone(), field_value_to_json(field, value)?);
        }
    }
    Ok(Json::Object(obj))
}

/// Parse a JSON object into a fresh message, coercing each member by its
/// declared field kind. Unknown members are ignored.
pub fn message_from_json(descriptor: &Arc<MessageDescriptor>, json: &Json) -> Result<Message> {
    let obj = json
        .as_object()
        .ok_or_else(|| MsgSqlError::Decode(format!("expected JSON object, got {json}")))?;

    let mut msg = Message::new(descriptor.clone());
    for field in &descriptor.fields {
        if let Some(member) = obj.get(&field.name) {
            if member.is_null() {
                continue;
            }
            msg.set(field.tag, field_value_from_json(field, member)?);
        }
    }
    Ok(msg)
}

/// Convert one field value to its JSON form.
pub fn field_value_to_json(field: &FieldDescriptor, value: &MsgValue) -> Result<Json> {
    match (&field.kind, value) {
        (FieldKind::Scalar(kind), v) => scalar_to_json(*kind, v),
        (FieldKind::Message, MsgValue::Msg(m)) => message_to_json(m),
        (FieldKind::Repeated(elem), MsgValue::List(items)) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(elem_to_json(elem, item)?);
            }
            Ok(Json::Array(out))
        }
        (FieldKind::Map { value: elem, .. }, MsgValue::Map(entries)) => {
            let mut obj = JsonMap::new();
            for (key, item) in entries {
                obj.insert(key.to_text(), elem_to_json(elem, item)?);
            }
            Ok(Json::Object(obj))
        }
        (kind, v) => Err(MsgSqlError::Encode(format!(
            "field '{}' kind {kind:?} does not accept {v:?}",
            field.name
        ))),
    }
}

/// Convert a JSON member back into a field value.
pub fn field_value_from_json(field: &FieldDescriptor, json: &Json) -> Result<MsgValue> {
    match &field.kind {
        FieldKind::Scalar(kind) => scalar_from_json(*kind, json),
        FieldKind::Message => {
            let nested = field.nested_descriptor()?;
            Ok(MsgValue::Msg(message_from_json(nested, json)?))
        }
        FieldKind::Repeated(elem) => {
            let items = json
                .as_array()
                .ok_or_else(|| MsgSqlError::Decode(format!("expected JSON array, got {json}")))?;
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(elem_from_json(elem, field.nested.as_ref(), item)?);
            }
            Ok(MsgValue::List(out))
        }
        FieldKind::Map { key, value } => {
            let obj = json
                .as_object()
                .ok_or_else(|| MsgSqlError::Decode(format!("expected JSON object, got {json}")))?;
            let mut out = BTreeMap::new();
            for (k, item) in obj {
                out.insert(
                    MapKey::parse(*key, k)?,
                    elem_from_json(value, field.nested.as_ref(), item)?,
                );
            }
            Ok(MsgValue::Map(out))
        }
    }
}

fn elem_to_json(elem: &ElemKind, value: &MsgValue) -> Result<Json> {
    match (elem, value) {
        (ElemKind::Scalar(kind), v) => scalar_to_json(*kind, v),
        (ElemKind::Message, MsgValue::Msg(m)) => message_to_json(m),
        (ElemKind::Message, v) => Err(MsgSqlError::Encode(format!(
            "message element expected, got {v:?}"
        ))),
    }
}

/// Parse one list element or map value from JSON.
pub fn elem_from_json(
    elem: &ElemKind,
    nested: Option<&Arc<MessageDescriptor>>,
    json: &Json,
) -> Result<MsgValue> {
    match elem {
        ElemKind::Scalar(kind) => scalar_from_json(*kind, json),
        ElemKind::Message => {
            let nested = nested.ok_or_else(|| {
                MsgSqlError::Decode("message element without a nested descriptor".to_string())
            })?;
            Ok(MsgValue::Msg(message_from_json(nested, json)?))
        }
    }
}

fn scalar_to_json(kind: ScalarKind, value: &MsgValue) -> Result<Json> {
    let json = match (kind, value) {
        (ScalarKind::Bool, MsgValue::Bool(b)) => Json::Bool(*b),
        (ScalarKind::Int32, MsgValue::I32(v)) | (ScalarKind::Enum, MsgValue::I32(v)) => {
            Json::from(*v)
        }
        (ScalarKind::Int64, MsgValue::I64(v)) => Json::from(*v),
        (ScalarKind::UInt32, MsgValue::U32(v)) => Json::from(*v),
        (ScalarKind::UInt64, MsgValue::U64(v)) => Json::from(*v),
        (ScalarKind::Float, MsgValue::F32(v)) => {
            Json::Number(serde_json::Number::from_f64(f64::from(*v)).ok_or_else(|| {
                MsgSqlError::Encode(format!("non-finite float {v} has no JSON form"))
            })?)
        }
        (ScalarKind::Double, MsgValue::F64(v)) => {
            Json::Number(serde_json::Number::from_f64(*v).ok_or_else(|| {
                MsgSqlError::Encode(format!("non-finite double {v} has no JSON form"))
            })?)
        }
        (ScalarKind::Str, MsgValue::Str(s)) => Json::String(s.clone()),
        (ScalarKind::Bytes, MsgValue::Bytes(b)) => Json::String(BASE64.encode(b)),
        (kind, v) => {
            return Err(MsgSqlError::Encode(format!(
                "scalar kind {kind:?} does not accept {v:?}"
            )))
        }
    };
    Ok(json)
}

/// Coerce a JSON value into a scalar of the declared kind.
///
/// Numbers are accepted as JSON numbers or decimal strings; negative
/// values reject uint kinds; bool additionally accepts 0/1 and the
/// quoted forms; bytes accept base64 strings.
pub fn scalar_from_json(kind: ScalarKind, json: &Json) -> Result<MsgValue> {
    match kind {
        ScalarKind::Bool => match json {
            Json::Bool(b) => Ok(MsgValue::Bool(*b)),
            Json::Number(n) => match n.as_i64() {
                Some(0) => Ok(MsgValue::Bool(false)),
                Some(1) => Ok(MsgValue::Bool(true)),
                _ => Err(MsgSqlError::ValueParse(format!("bad bool {json}"))),
            },
            Json::String(s) => match s.as_str() {
                "true" | "1" => Ok(MsgValue::Bool(true)),
                "false" | "0" => Ok(MsgValue::Bool(false)),
                _ => Err(MsgSqlError::ValueParse(format!("bad bool '{s}'"))),
            },
            _ => Err(MsgSqlError::ValueParse(format!("bad bool {json}"))),
        },
        ScalarKind::Int32 | ScalarKind::Enum => {
            let v = json_i64(json)?;
            i32::try_from(v)
                .map(MsgValue::I32)
                .map_err(|_| MsgSqlError::ValueParse(format!("int32 out of range: {v}")))
        }
        ScalarKind::Int64 => Ok(MsgValue::I64(json_i64(json)?)),
        ScalarKind::UInt32 => {
            let v = json_u64(json)?;
            u32::try_from(v)
                .map(MsgValue::U32)
                .map_err(|_| MsgSqlError::ValueParse(format!("uint32 out of range: {v}")))
        }
        ScalarKind::UInt64 => Ok(MsgValue::U64(json_u64(json)?)),
        ScalarKind::Float => Ok(MsgValue::F32(json_f64(json)? as f32)),
        ScalarKind::Double => Ok(MsgValue::F64(json_f64(json)?)),
        ScalarKind::Str => match json {
            Json::String(s) => Ok(MsgValue::Str(s.clone())),
            _ => Err(MsgSqlError::ValueParse(format!("expected string, got {json}"))),
        },
        ScalarKind::Bytes => match json {
            Json::String(s) => BASE64
                .decode(s)
                .map(MsgValue::Bytes)
                .map_err(|e| MsgSqlError::ValueParse(format!("bad base64: {e}"))),
            _ => Err(MsgSqlError::ValueParse(format!("expected base64 string, got {json}"))),
        },
    }
}

fn json_i64(json: &Json) -> Result<i64> {
    match json {
        Json::Number(n) => n
            .as_i64()
            .ok_or_else(|| MsgSqlError::ValueParse(format!("bad integer {json}"))),
        Json::String(s) => s
            .parse::<i64>()
            .map_err(|_| MsgSqlError::ValueParse(format!("bad integer '{s}'"))),
        _ => Err(MsgSqlError::ValueParse(format!("bad integer {json}"))),
    }
}

fn json_u64(json: &Json) -> Result<u64> {
    match json {
        Json::Number(n) => n
            .as_u64()
            .ok_or_else(|| MsgSqlError::ValueParse(format!("bad unsigned integer {json}"))),
        Json::String(s) => s
            .parse::<u64>()
            .map_err(|_| MsgSqlError::ValueParse(format!("bad unsigned integer '{s}'"))),
        _ => Err(MsgSqlError::ValueParse(format!("bad unsigned integer {json}"))),
    }
}

fn json_f64(json: &Json) -> Result<f64> {
    match json {
        Json::Number(n) => n
            .as_f64()
            .ok_or_else(|| MsgSqlError::ValueParse(format!("bad float {json}"))),
        Json::String(s) => s
            .parse::<f64>()
            .map_err(|_| MsgSqlError::ValueParse(format!("bad float '{s}'"))),
        _ => Err(MsgSqlError::ValueParse(format!("bad float {json}"))),
    }
}
