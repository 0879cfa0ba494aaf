/// Message <-> bytes
///
/// Two wire modes: `Binary` serializes the tag -> value tree with
/// bincode; `Json` serializes the field-name-keyed JSON object. Decoding
/// always rebuilds a fresh message against the descriptor.
use crate::error::{MsgSqlError, Result};
use crate::schema::descriptor::{ElemKind, FieldDescriptor, FieldKind, MessageDescriptor};
use crate::schema::message::{message_from_json, message_to_json, MapKey, Message, MsgValue};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Wire serialization mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MsgFormat {
    /// bincode over the tag -> value tree
    #[default]
    Binary = 0,
    /// JSON object keyed by field name
    Json = 1,
}

impl MsgFormat {
    pub fn from_i32(v: i32) -> Result<Self> {
        match v {
            0 => Ok(MsgFormat::Binary),
            1 => Ok(MsgFormat::Json),
            _ => Err(MsgSqlError::Decode(format!("unknown message format {v}"))),
        }
    }
}

/// Descriptor-free value tree used by the binary format.
#[derive(Debug, Clone, Serialize, Deserialize)]
enum WireValue {
    Bool(bool),
    I32(i32),
    I64(i64),
    U32(u32),
    U64(u64),
    F32(f32),
    F64(f64),
    Str(String),
    Bytes(Vec<u8>),
    List(Vec<WireValue>),
    Map(Vec<(WireKey, WireValue)>),
    Msg(BTreeMap<u32, WireValue>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
enum WireKey {
    Bool(bool),
    Int(i64),
    Uint(u64),
    Str(String),
}

/// Serialize a message in the requested format.
pub fn encode_message(msg: &Message, format: MsgFormat) -> Result<Vec<u8>> {
    match format {
        MsgFormat::Binary => Ok(bincode::serialize(&to_wire_map(msg))?),
        MsgFormat::Json => Ok(serde_json::to_vec(&message_to_json(msg)?)?),
    }
}

/// Parse wire bytes into a fresh message of the given type.
pub fn decode_message(
    descriptor: &Arc<MessageDescriptor>,
    bytes: &[u8],
    format: MsgFormat,
) -> Result<Message> {
    match format {
        MsgFormat::Binary => {
            let map: BTreeMap<u32, WireValue> = bincode::deserialize(bytes)?;
            from_wire_map(descriptor, map)
        }
        MsgFormat::Json => {
            let json: serde_json::Value = serde_json::from_slice(bytes)?;
            message_from_json(descriptor, &json)
        }
    }
}

fn to_wire_map(msg: &Message) -> BTreeMap<u32, WireValue> {
    msg.values()
        .iter()
        .map(|(&tag, value)| (tag, to_wire(value)))
        .collect()
}

fn to_wire(value: &MsgValue) -> WireValue {
    match value {
        MsgValue::Bool(v) => WireValue::Bool(*v),
        MsgValue::I32(v) => WireValue::I32(*v),
        MsgValue::I64(v) => WireValue::I64(*v),
        MsgValue::U32(v) => WireValue::U32(*v),
        MsgValue::U64(v) => WireValue::U64(*v),
        MsgValue::F32(v) => WireValue::F32(*v),
        MsgValue::F64(v) => WireValue::F64(*v),
        MsgValue::Str(v) => WireValue::Str(v.clone()),
        MsgValue::Bytes(v) => WireValue::Bytes(v.clone()),
        MsgValue::List(items) => WireValue::List(items.iter().map(to_wire).collect()),
        MsgValue::Map(entries) => WireValue::Map(
            entries
                .iter()
                .map(|(k, v)| (key_to_wire(k), to_wire(v)))
                .collect(),
        ),
        MsgValue::Msg(m) => WireValue::Msg(to_wire_map(m)),
    }
}

fn key_to_wire(key: &MapKey) -> WireKey {
    match key {
        MapKey::Bool(v) => WireKey::Bool(*v),
        MapKey::Int(v) => WireKey::Int(*v),
        MapKey::Uint(v) => WireKey::Uint(*v),
        MapKey::Str(v) => WireKey::Str(v.clone()),
    }
}

fn key_from_wire(key: WireKey) -> MapKey {
    match key {
        WireKey::Bool(v) => MapKey::Bool(v),
        WireKey::Int(v) => MapKey::Int(v),
        WireKey::Uint(v) => MapKey::Uint(v),
        WireKey::Str(v) => MapKey::Str(v),
    }
}

fn from_wire_map(
    descriptor: &Arc<MessageDescriptor>,
    map: BTreeMap<u32, WireValue>,
) -> Result<Message> {
    let mut msg = Message::new(descriptor.clone());
    for (tag, wire) in map {
        // unknown tags are dropped, matching schema evolution behavior
        let Some(field) = descriptor.field_by_tag(tag) else {
            continue;
        };
        msg.set(tag, from_wire(field, wire)?);
    }
    Ok(msg)
}

fn from_wire(field: &FieldDescriptor, wire: WireValue) -> Result<MsgValue> {
    match wire {
        WireValue::Bool(v) => Ok(MsgValue::Bool(v)),
        WireValue::I32(v) => Ok(MsgValue::I32(v)),
        WireValue::I64(v) => Ok(MsgValue::I64(v)),
        WireValue::U32(v) => Ok(MsgValue::U32(v)),
        WireValue::U64(v) => Ok(MsgValue::U64(v)),
        WireValue::F32(v) => Ok(MsgValue::F32(v)),
        WireValue::F64(v) => Ok(MsgValue::F64(v)),
        WireValue::Str(v) => Ok(MsgValue::Str(v)),
        WireValue::Bytes(v) => Ok(MsgValue::Bytes(v)),
        WireValue::List(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(elem_from_wire(field, item)?);
            }
            Ok(MsgValue::List(out))
        }
        WireValue::Map(entries) => {
            let mut out = BTreeMap::new();
            for (key, value) in entries {
                out.insert(key_from_wire(key), elem_from_wire(field, value)?);
            }
            Ok(MsgValue::Map(out))
        }
        WireValue::Msg(map) => Ok(MsgValue::Msg(from_wire_map(field.nested_descriptor()?, map)?)),
    }
}

fn elem_from_wire(field: &FieldDescriptor, wire: WireValue) -> Result<MsgValue> {
    match wire {
        WireValue::Msg(map) => {
            let elem_is_message = matches!(
                &field.kind,
                FieldKind::Repeated(ElemKind::Message)
                    | FieldKind::Map {
                        value: ElemKind::Message,
                        ..
                    }
            );
            if !elem_is_message {
                return Err(MsgSqlError::Decode(format!(
                    "field '{}': unexpected message element",
                    field.name
                )));
            }
            Ok(MsgValue::Msg(from_wire_map(field.nested_descriptor()?, map)?))
        }
        other => from_wire(field, other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::descriptor::{FieldDescriptor, ScalarKind};

    fn desc() -> Arc<MessageDescriptor> {
        let sub = Arc::new(MessageDescriptor::new(
            "sub",
            vec![FieldDescriptor::new("name", 1, FieldKind::Scalar(ScalarKind::Str))],
        ));
        Arc::new(MessageDescriptor::new(
            "t",
            vec![
                FieldDescriptor::new("id", 1, FieldKind::Scalar(ScalarKind::Int64)),
                FieldDescriptor::new(
                    "tags",
                    2,
                    FieldKind::Repeated(ElemKind::Scalar(ScalarKind::Str)),
                ),
                FieldDescriptor::new(
                    "attrs",
                    3,
                    FieldKind::Map {
                        key: ScalarKind::Str,
                        value: ElemKind::Scalar(ScalarKind::Int64),
                    },
                ),
                FieldDescriptor::new("sub", 4, FieldKind::Message).nested(sub),
            ],
        ))
    }

    fn sample(descriptor: &Arc<MessageDescriptor>) -> Message {
        let mut msg = Message::new(descriptor.clone());
        msg.set(1, MsgValue::I64(9));
        msg.set(
            2,
            MsgValue::List(vec![MsgValue::Str("a".into()), MsgValue::Str("b".into())]),
        );
        let mut attrs = BTreeMap::new();
        attrs.insert(MapKey::Str("k".into()), MsgValue::I64(1));
        msg.set(3, MsgValue::Map(attrs));

        let sub_desc = descriptor.field("sub").unwrap().nested.clone().unwrap();
        let mut sub = Message::new(sub_desc);
        sub.set(1, MsgValue::Str("inner".into()));
        msg.set(4, MsgValue::Msg(sub));
        msg
    }

    #[test]
    fn test_binary_round_trip() {
        let descriptor = desc();
        let msg = sample(&descriptor);
        let bytes = encode_message(&msg, MsgFormat::Binary).unwrap();
        let back = decode_message(&descriptor, &bytes, MsgFormat::Binary).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn test_json_round_trip() {
        let descriptor = desc();
        let msg = sample(&descriptor);
        let bytes = encode_message(&msg, MsgFormat::Json).unwrap();
        let back = decode_message(&descriptor, &bytes, MsgFormat::Json).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn test_format_codes() {
        assert_eq!(MsgFormat::from_i32(0).unwrap(), MsgFormat::Binary);
        assert_eq!(MsgFormat::from_i32(1).unwrap(), MsgFormat::Json);
        assert!(MsgFormat::from_i32(9).is_err());
    }
}
