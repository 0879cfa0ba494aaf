/// Field value -> driver argument
///
/// Scalars pass through as their driver primitives. On Postgres,
/// repeated scalars bind as typed arrays with uint widths widened to
/// bigint; everywhere else lists travel as JSON text. Repeated messages,
/// maps and nested messages always travel as JSON text.
use crate::error::{MsgSqlError, Result};
use crate::schema::descriptor::{ElemKind, FieldDescriptor, FieldKind, ScalarKind};
use crate::schema::message::{field_value_to_json, MsgValue};
use crate::sql::dialect::Dialect;
use crate::types::SqlValue;

/// Encode one field value into its driver argument. `None` stands for
/// an unset field and encodes as the kind's zero form.
pub fn encode_field(
    field: &FieldDescriptor,
    dialect: Dialect,
    value: Option<&MsgValue>,
) -> Result<SqlValue> {
    match &field.kind {
        FieldKind::Scalar(kind) => match value {
            Some(v) => encode_scalar(field, *kind, v),
            None => encode_scalar_zero(*kind),
        },
        FieldKind::Message => match value {
            Some(MsgValue::Msg(m)) => {
                let json = crate::schema::message::message_to_json(m)?;
                Ok(SqlValue::Text(json.to_string()))
            }
            Some(v) => Err(mismatch(field, v)),
            None => Ok(SqlValue::Null),
        },
        FieldKind::Repeated(elem) => {
            let items: &[MsgValue] = match value {
                Some(MsgValue::List(items)) => items,
                Some(v) => return Err(mismatch(field, v)),
                None => &[],
            };
            match elem {
                ElemKind::Scalar(kind) if dialect == Dialect::Postgres => {
                    encode_scalar_array(field, *kind, items)
                }
                _ => {
                    let json = field_value_to_json(field, &MsgValue::List(items.to_vec()))?;
                    Ok(SqlValue::Text(json.to_string()))
                }
            }
        }
        FieldKind::Map { .. } => match value {
            Some(v @ MsgValue::Map(_)) => {
                let json = field_value_to_json(field, v)?;
                Ok(SqlValue::Text(json.to_string()))
            }
            Some(v) => Err(mismatch(field, v)),
            None => Ok(SqlValue::Text("{}".to_string())),
        },
    }
}

fn mismatch(field: &FieldDescriptor, value: &MsgValue) -> MsgSqlError {
    MsgSqlError::Encode(format!(
        "field '{}' of kind {:?} does not accept {value:?}",
        field.name, field.kind
    ))
}

fn encode_scalar(field: &FieldDescriptor, kind: ScalarKind, value: &MsgValue) -> Result<SqlValue> {
    let out = match (kind, value) {
        (ScalarKind::Bool, MsgValue::Bool(b)) => SqlValue::Bool(*b),
        (ScalarKind::Int32, MsgValue::I32(v)) | (ScalarKind::Enum, MsgValue::I32(v)) => {
            SqlValue::Int(i64::from(*v))
        }
        (ScalarKind::Int64, MsgValue::I64(v)) => SqlValue::Int(*v),
        (ScalarKind::UInt32, MsgValue::U32(v)) => SqlValue::Int(i64::from(*v)),
        (ScalarKind::UInt64, MsgValue::U64(v)) => SqlValue::Int(widen_u64(field, *v)?),
        (ScalarKind::Float, MsgValue::F32(v)) => SqlValue::Float(f64::from(*v)),
        (ScalarKind::Double, MsgValue::F64(v)) => SqlValue::Float(*v),
        (ScalarKind::Str, MsgValue::Str(s)) => SqlValue::Text(s.clone()),
        (ScalarKind::Bytes, MsgValue::Bytes(b)) => SqlValue::Bytes(b.clone()),
        _ => return Err(mismatch(field, value)),
    };
    Ok(out)
}

fn encode_scalar_zero(kind: ScalarKind) -> Result<SqlValue> {
    let out = match kind {
        ScalarKind::Bool => SqlValue::Bool(false),
        ScalarKind::Int32
        | ScalarKind::Int64
        | ScalarKind::UInt32
        | ScalarKind::UInt64
        | ScalarKind::Enum => SqlValue::Int(0),
        ScalarKind::Float | ScalarKind::Double => SqlValue::Float(0.0),
        ScalarKind::Str => SqlValue::Text(String::new()),
        ScalarKind::Bytes => SqlValue::Bytes(Vec::new()),
    };
    Ok(out)
}

fn widen_u64(field: &FieldDescriptor, v: u64) -> Result<i64> {
    i64::try_from(v).map_err(|_| {
        MsgSqlError::Encode(format!(
            "field '{}': uint64 value {v} exceeds the driver integer range",
            field.name
        ))
    })
}

/// Typed Postgres array bind for a repeated-scalar field.
fn encode_scalar_array(
    field: &FieldDescriptor,
    kind: ScalarKind,
    items: &[MsgValue],
) -> Result<SqlValue> {
    match kind {
        ScalarKind::Bool => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                match item {
                    MsgValue::Bool(b) => out.push(*b),
                    v => return Err(mismatch(field, v)),
                }
            }
            Ok(SqlValue::BoolArray(out))
        }
        ScalarKind::Int32
        | ScalarKind::Int64
        | ScalarKind::UInt32
        | ScalarKind::UInt64
        | ScalarKind::Enum => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                match item {
                    MsgValue::I32(v) => out.push(i64::from(*v)),
                    MsgValue::I64(v) => out.push(*v),
                    MsgValue::U32(v) => out.push(i64::from(*v)),
                    MsgValue::U64(v) => out.push(widen_u64(field, *v)?),
                    v => return Err(mismatch(field, v)),
                }
            }
            Ok(SqlValue::IntArray(out))
        }
        ScalarKind::Float | ScalarKind::Double => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                match item {
                    MsgValue::F32(v) => out.push(f64::from(*v)),
                    MsgValue::F64(v) => out.push(*v),
                    v => return Err(mismatch(field, v)),
                }
            }
            Ok(SqlValue::FloatArray(out))
        }
        ScalarKind::Str => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                match item {
                    MsgValue::Str(s) => out.push(s.clone()),
                    v => return Err(mismatch(field, v)),
                }
            }
            Ok(SqlValue::TextArray(out))
        }
        // bytes elements have no typed-array form; they travel as a JSON
        // array of base64 strings like every other dialect
        ScalarKind::Bytes => {
            let json = field_value_to_json(field, &MsgValue::List(items.to_vec()))?;
            Ok(SqlValue::Text(json.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::descriptor::{FieldDescriptor, MessageDescriptor};
    use crate::schema::message::{MapKey, Message};
    use std::collections::BTreeMap;
    use std::sync::Arc;

    #[test]
    fn test_scalar_pass_through() {
        let f = FieldDescriptor::new("n", 1, FieldKind::Scalar(ScalarKind::Int32));
        assert_eq!(
            encode_field(&f, Dialect::Postgres, Some(&MsgValue::I32(-5))).unwrap(),
            SqlValue::Int(-5)
        );
        assert_eq!(
            encode_field(&f, Dialect::Postgres, None).unwrap(),
            SqlValue::Int(0)
        );
    }

    #[test]
    fn test_scalar_type_mismatch() {
        let f = FieldDescriptor::new("n", 1, FieldKind::Scalar(ScalarKind::Int32));
        assert!(matches!(
            encode_field(&f, Dialect::Postgres, Some(&MsgValue::Str("x".into()))),
            Err(MsgSqlError::Encode(_))
        ));
    }

    #[test]
    fn test_repeated_uint64_widens_on_postgres() {
        let f = FieldDescriptor::new(
            "ids",
            1,
            FieldKind::Repeated(ElemKind::Scalar(ScalarKind::UInt64)),
        );
        let value = MsgValue::List(vec![MsgValue::U64(1), MsgValue::U64(2)]);
        assert_eq!(
            encode_field(&f, Dialect::Postgres, Some(&value)).unwrap(),
            SqlValue::IntArray(vec![1, 2])
        );
        // unset list binds as an empty sequence
        assert_eq!(
            encode_field(&f, Dialect::Postgres, None).unwrap(),
            SqlValue::IntArray(vec![])
        );
    }

    #[test]
    fn test_repeated_scalar_is_json_off_postgres() {
        let f = FieldDescriptor::new(
            "tags",
            1,
            FieldKind::Repeated(ElemKind::Scalar(ScalarKind::Str)),
        );
        let value = MsgValue::List(vec![MsgValue::Str("a".into()), MsgValue::Str("b".into())]);
        assert_eq!(
            encode_field(&f, Dialect::Sqlite, Some(&value)).unwrap(),
            SqlValue::Text(r#"["a","b"]"#.to_string())
        );
    }

    #[test]
    fn test_repeated_message_is_json_everywhere() {
        let sub = Arc::new(MessageDescriptor::new(
            "sub",
            vec![FieldDescriptor::new("name", 1, FieldKind::Scalar(ScalarKind::Str))],
        ));
        let f = FieldDescriptor::new("subs", 1, FieldKind::Repeated(ElemKind::Message))
            .nested(sub.clone());

        let mut a = Message::new(sub.clone());
        a.set(1, MsgValue::Str("a".into()));
        let mut b = Message::new(sub);
        b.set(1, MsgValue::Str("b".into()));

        let encoded = encode_field(
            &f,
            Dialect::Postgres,
            Some(&MsgValue::List(vec![MsgValue::Msg(a), MsgValue::Msg(b)])),
        )
        .unwrap();

        let SqlValue::Text(text) = encoded else {
            panic!("expected text, got {encoded:?}");
        };
        let parsed: serde_json::Value = serde_json::from_str(&text).unwrap();
        let arr = parsed.as_array().unwrap();
        assert_eq!(arr.len(), 2);
        assert_eq!(arr[0]["name"], "a");
        assert_eq!(arr[1]["name"], "b");
    }

    #[test]
    fn test_map_encodes_textual_keys() {
        let f = FieldDescriptor::new(
            "m",
            1,
            FieldKind::Map {
                key: ScalarKind::Bool,
                value: ElemKind::Scalar(ScalarKind::Int64),
            },
        );
        let mut entries = BTreeMap::new();
        entries.insert(MapKey::Bool(true), MsgValue::I64(7));
        let encoded =
            encode_field(&f, Dialect::Postgres, Some(&MsgValue::Map(entries))).unwrap();
        assert_eq!(encoded, SqlValue::Text(r#"{"true":7}"#.to_string()));

        // nil maps become the empty object
        assert_eq!(
            encode_field(&f, Dialect::Postgres, None).unwrap(),
            SqlValue::Text("{}".to_string())
        );
    }

    #[test]
    fn test_u64_overflow_rejected() {
        let f = FieldDescriptor::new("n", 1, FieldKind::Scalar(ScalarKind::UInt64));
        assert!(encode_field(&f, Dialect::Postgres, Some(&MsgValue::U64(u64::MAX))).is_err());
    }
}
