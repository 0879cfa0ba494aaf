/// Scanned value -> field value
///
/// Scanned values arrive as driver-neutral boxes. Scalars coerce width
/// and interpret common text forms; lists accept JSON array literals,
/// Postgres array literals, or typed driver arrays; maps and nested
/// messages require JSON objects. Numeric parsing is strict.
use crate::error::{MsgSqlError, Result};
use crate::schema::annotation::DbType;
use crate::schema::descriptor::{ElemKind, FieldDescriptor, FieldKind, ScalarKind};
use crate::schema::message::{elem_from_json, message_from_json, scalar_from_json, Message, MsgValue};
use crate::types::SqlValue;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde_json::Value as Json;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use uuid::Uuid;

/// Decode one scanned column into a field value. `Ok(None)` means SQL
/// NULL: the field stays unset.
pub fn decode_field(field: &FieldDescriptor, scanned: &SqlValue) -> Result<Option<MsgValue>> {
    if scanned.is_null() {
        return Ok(None);
    }
    let value = match &field.kind {
        FieldKind::Scalar(kind) => decode_scalar(field, *kind, scanned)?,
        FieldKind::Message => {
            let json = scanned_json(field, scanned)?;
            MsgValue::Msg(message_from_json(field.nested_descriptor()?, &json)?)
        }
        FieldKind::Repeated(elem) => decode_list(field, elem, scanned)?,
        FieldKind::Map { .. } => {
            let json = scanned_json(field, scanned)?;
            if !json.is_object() {
                return Err(MsgSqlError::Decode(format!(
                    "field '{}': expected a JSON object, got {json}",
                    field.name
                )));
            }
            crate::schema::message::field_value_from_json(field, &json)?
        }
    };
    Ok(Some(value))
}

/// Scan a projected row into a message. Columns that name no declared
/// field (result expressions) are skipped.
pub fn scan_row(msg: &mut Message, columns: &[String], row: &[SqlValue]) -> Result<()> {
    let descriptor = msg.descriptor().clone();
    for (column, scanned) in columns.iter().zip(row) {
        let Some(field) = descriptor.field(column) else {
            continue;
        };
        if let Some(value) = decode_field(field, scanned)? {
            msg.set(field.tag, value);
        }
    }
    Ok(())
}

fn decode_scalar(field: &FieldDescriptor, kind: ScalarKind, scanned: &SqlValue) -> Result<MsgValue> {
    match kind {
        ScalarKind::Bool => match scanned {
            SqlValue::Bool(b) => Ok(MsgValue::Bool(*b)),
            SqlValue::Int(0) => Ok(MsgValue::Bool(false)),
            SqlValue::Int(1) => Ok(MsgValue::Bool(true)),
            SqlValue::Text(s) => match s.as_str() {
                "true" | "1" => Ok(MsgValue::Bool(true)),
                "false" | "0" => Ok(MsgValue::Bool(false)),
                _ => Err(bad_scan(field, scanned)),
            },
            _ => Err(bad_scan(field, scanned)),
        },
        ScalarKind::Int32 | ScalarKind::Enum => {
            let v = scanned_i64(field, scanned)?;
            i32::try_from(v)
                .map(MsgValue::I32)
                .map_err(|_| MsgSqlError::Decode(format!("field '{}': int32 out of range: {v}", field.name)))
        }
        ScalarKind::Int64 => Ok(MsgValue::I64(scanned_i64(field, scanned)?)),
        ScalarKind::UInt32 => {
            let v = scanned_u64(field, scanned)?;
            u32::try_from(v)
                .map(MsgValue::U32)
                .map_err(|_| MsgSqlError::Decode(format!("field '{}': uint32 out of range: {v}", field.name)))
        }
        ScalarKind::UInt64 => Ok(MsgValue::U64(scanned_u64(field, scanned)?)),
        ScalarKind::Float => Ok(MsgValue::F32(scanned_f64(field, scanned)? as f32)),
        ScalarKind::Double => Ok(MsgValue::F64(scanned_f64(field, scanned)?)),
        ScalarKind::Str => decode_string(field, scanned),
        ScalarKind::Bytes => match scanned {
            SqlValue::Bytes(b) => Ok(MsgValue::Bytes(b.clone())),
            SqlValue::Text(s) => BASE64
                .decode(s)
                .map(MsgValue::Bytes)
                .map_err(|e| MsgSqlError::Decode(format!("field '{}': bad base64: {e}", field.name))),
            _ => Err(bad_scan(field, scanned)),
        },
    }
}

fn decode_string(field: &FieldDescriptor, scanned: &SqlValue) -> Result<MsgValue> {
    match scanned {
        SqlValue::Text(s) => {
            if field.annotation.db_type == DbType::Timestamp {
                return Ok(MsgValue::Str(normalize_timestamp(s)));
            }
            Ok(MsgValue::Str(s.clone()))
        }
        // a uuid column scanned as raw bytes becomes its textual form
        SqlValue::Bytes(b) if field.annotation.db_type == DbType::Uuid && b.len() == 16 => {
            let uuid = Uuid::from_slice(b)
                .map_err(|e| MsgSqlError::Decode(format!("field '{}': bad uuid: {e}", field.name)))?;
            Ok(MsgValue::Str(uuid.hyphenated().to_string()))
        }
        SqlValue::Bytes(b) => String::from_utf8(b.clone())
            .map(MsgValue::Str)
            .map_err(|e| MsgSqlError::Decode(format!("field '{}': invalid utf-8: {e}", field.name))),
        _ => Err(bad_scan(field, scanned)),
    }
}

/// Interpret common text-encoded timestamps as RFC 3339. Driver forms
/// with a space separator and no offset are read as UTC. Unrecognized
/// text passes through unchanged.
fn normalize_timestamp(text: &str) -> String {
    if let Ok(ts) = OffsetDateTime::parse(text, &Rfc3339) {
        return ts.format(&Rfc3339).unwrap_or_else(|_| text.to_string());
    }
    let mut candidate = text.replacen(' ', "T", 1);
    if !candidate.ends_with('Z') && !candidate.contains('+') {
        candidate.push('Z');
    }
    if let Ok(ts) = OffsetDateTime::parse(&candidate, &Rfc3339) {
        return ts.format(&Rfc3339).unwrap_or_else(|_| text.to_string());
    }
    text.to_string()
}

fn bad_scan(field: &FieldDescriptor, scanned: &SqlValue) -> MsgSqlError {
    MsgSqlError::Decode(format!(
        "field '{}' of kind {:?} cannot decode a {} value",
        field.name,
        field.kind,
        scanned.kind_name()
    ))
}

fn scanned_i64(field: &FieldDescriptor, scanned: &SqlValue) -> Result<i64> {
    match scanned {
        SqlValue::Int(v) => Ok(*v),
        SqlValue::Text(s) => {
            if let Ok(v) = s.parse::<i64>() {
                return Ok(v);
            }
            // int64 timestamp columns sometimes scan as ISO-8601 text
            OffsetDateTime::parse(s, &Rfc3339)
                .map(|ts| (ts.unix_timestamp_nanos() / 1_000) as i64)
                .map_err(|_| MsgSqlError::Decode(format!("field '{}': bad integer '{s}'", field.name)))
        }
        _ => Err(bad_scan(field, scanned)),
    }
}

fn scanned_u64(field: &FieldDescriptor, scanned: &SqlValue) -> Result<u64> {
    match scanned {
        SqlValue::Int(v) => u64::try_from(*v).map_err(|_| {
            MsgSqlError::Decode(format!("field '{}': negative value {v} for uint kind", field.name))
        }),
        SqlValue::Text(s) => s
            .parse::<u64>()
            .map_err(|_| MsgSqlError::Decode(format!("field '{}': bad unsigned integer '{s}'", field.name))),
        _ => Err(bad_scan(field, scanned)),
    }
}

fn scanned_f64(field: &FieldDescriptor, scanned: &SqlValue) -> Result<f64> {
    match scanned {
        SqlValue::Float(v) => Ok(*v),
        SqlValue::Int(v) => Ok(*v as f64),
        SqlValue::Text(s) => s
            .parse::<f64>()
            .map_err(|_| MsgSqlError::Decode(format!("field '{}': bad float '{s}'", field.name))),
        _ => Err(bad_scan(field, scanned)),
    }
}

fn scanned_json(field: &FieldDescriptor, scanned: &SqlValue) -> Result<Json> {
    let text = match scanned {
        SqlValue::Text(s) => s.clone(),
        SqlValue::Bytes(b) => String::from_utf8(b.clone())
            .map_err(|e| MsgSqlError::Decode(format!("field '{}': invalid utf-8: {e}", field.name)))?,
        _ => return Err(bad_scan(field, scanned)),
    };
    serde_json::from_str(&text)
        .map_err(|e| MsgSqlError::Decode(format!("field '{}': bad JSON: {e}", field.name)))
}

fn decode_list(field: &FieldDescriptor, elem: &ElemKind, scanned: &SqlValue) -> Result<MsgValue> {
    // typed driver arrays from the Postgres scan path
    match scanned {
        SqlValue::IntArray(items) => {
            let ElemKind::Scalar(kind) = elem else {
                return Err(bad_scan(field, scanned));
            };
            let mut out = Vec::with_capacity(items.len());
            for &v in items {
                out.push(int_to_scalar(field, *kind, v)?);
            }
            return Ok(MsgValue::List(out));
        }
        SqlValue::FloatArray(items) => {
            let out = match elem {
                ElemKind::Scalar(ScalarKind::Float) => {
                    items.iter().map(|&v| MsgValue::F32(v as f32)).collect()
                }
                ElemKind::Scalar(ScalarKind::Double) => {
                    items.iter().map(|&v| MsgValue::F64(v)).collect()
                }
                _ => return Err(bad_scan(field, scanned)),
            };
            return Ok(MsgValue::List(out));
        }
        SqlValue::TextArray(items) => {
            let ElemKind::Scalar(kind) = elem else {
                return Err(bad_scan(field, scanned));
            };
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(atom_to_scalar(field, *kind, item)?);
            }
            return Ok(MsgValue::List(out));
        }
        SqlValue::BoolArray(items) => {
            if *elem != ElemKind::Scalar(ScalarKind::Bool) {
                return Err(bad_scan(field, scanned));
            }
            return Ok(MsgValue::List(
                items.iter().map(|&b| MsgValue::Bool(b)).collect(),
            ));
        }
        _ => {}
    }

    let text = match scanned {
        SqlValue::Text(s) => s.clone(),
        SqlValue::Bytes(b) => String::from_utf8(b.clone())
            .map_err(|e| MsgSqlError::Decode(format!("field '{}': invalid utf-8: {e}", field.name)))?,
        _ => return Err(bad_scan(field, scanned)),
    };
    let trimmed = text.trim();

    if trimmed.starts_with('[') {
        let json: Json = serde_json::from_str(trimmed)
            .map_err(|e| MsgSqlError::Decode(format!("field '{}': bad JSON array: {e}", field.name)))?;
        let items = json.as_array().ok_or_else(|| bad_scan(field, scanned))?;
        if *elem == ElemKind::Message {
            for item in items {
                if !item.is_object() {
                    return Err(MsgSqlError::Decode(format!(
                        "field '{}': expected an array of objects, got {item}",
                        field.name
                    )));
                }
            }
        }
        let mut out = Vec::with_capacity(items.len());
        for item in items {
            out.push(elem_from_json(elem, field.nested.as_ref(), item)?);
        }
        return Ok(MsgValue::List(out));
    }

    if trimmed.starts_with('{') {
        let ElemKind::Scalar(kind) = elem else {
            return Err(MsgSqlError::Decode(format!(
                "field '{}': Postgres array literal holds no messages",
                field.name
            )));
        };
        let atoms = parse_pg_array(trimmed)
            .map_err(|e| MsgSqlError::Decode(format!("field '{}': {e}", field.name)))?;
        let mut out = Vec::with_capacity(atoms.len());
        for atom in atoms {
            match atom {
                // the literal NULL decodes as the element's empty value
                None => out.push(crate::schema::message::zero_value(&FieldKind::Scalar(*kind))),
                Some(atom) => out.push(atom_to_scalar(field, *kind, &atom)?),
            }
        }
        return Ok(MsgValue::List(out));
    }

    Err(MsgSqlError::Decode(format!(
        "field '{}': '{trimmed}' is neither a JSON nor a Postgres array literal",
        field.name
    )))
}

fn int_to_scalar(field: &FieldDescriptor, kind: ScalarKind, v: i64) -> Result<MsgValue> {
    match kind {
        ScalarKind::Int32 | ScalarKind::Enum => i32::try_from(v)
            .map(MsgValue::I32)
            .map_err(|_| MsgSqlError::Decode(format!("field '{}': int32 out of range: {v}", field.name))),
        ScalarKind::Int64 => Ok(MsgValue::I64(v)),
        ScalarKind::UInt32 => u32::try_from(v)
            .map(MsgValue::U32)
            .map_err(|_| MsgSqlError::Decode(format!("field '{}': uint32 out of range: {v}", field.name))),
        ScalarKind::UInt64 => u64::try_from(v)
            .map(MsgValue::U64)
            .map_err(|_| MsgSqlError::Decode(format!("field '{}': negative value {v} for uint kind", field.name))),
        ScalarKind::Float => Ok(MsgValue::F32(v as f32)),
        ScalarKind::Double => Ok(MsgValue::F64(v as f64)),
        ScalarKind::Bool => match v {
            0 => Ok(MsgValue::Bool(false)),
            1 => Ok(MsgValue::Bool(true)),
            _ => Err(MsgSqlError::Decode(format!("field '{}': bad bool {v}", field.name))),
        },
        _ => Err(MsgSqlError::Decode(format!(
            "field '{}': integer array cannot hold {kind:?}",
            field.name
        ))),
    }
}

/// Convert one textual array atom into the declared scalar kind.
fn atom_to_scalar(field: &FieldDescriptor, kind: ScalarKind, atom: &str) -> Result<MsgValue> {
    match kind {
        ScalarKind::Str => Ok(MsgValue::Str(atom.to_string())),
        ScalarKind::Bytes => BASE64
            .decode(atom)
            .map(MsgValue::Bytes)
            .map_err(|e| MsgSqlError::Decode(format!("field '{}': bad base64: {e}", field.name))),
        _ => scalar_from_json(kind, &Json::String(atom.to_string()))
            .map_err(|e| MsgSqlError::Decode(format!("field '{}': {e}", field.name))),
    }
}

/// Parse a Postgres array literal into its atoms. Supports unquoted
/// atoms, double-quoted atoms with `\\` and `\"` escapes, and the
/// unquoted literal `NULL` (returned as `None`).
fn parse_pg_array(text: &str) -> std::result::Result<Vec<Option<String>>, String> {
    let inner = text
        .strip_prefix('{')
        .and_then(|t| t.strip_suffix('}'))
        .ok_or_else(|| format!("'{text}' is not a braced array literal"))?;

    let mut atoms = Vec::new();
    let mut chars = inner.chars().peekable();

    loop {
        while matches!(chars.peek(), Some(c) if c.is_whitespace()) {
            chars.next();
        }
        match chars.peek() {
            None => break,
            Some('"') => {
                chars.next();
                let mut atom = String::new();
                loop {
                    match chars.next() {
                        Some('\\') => match chars.next() {
                            Some(c) => atom.push(c),
                            None => return Err("unterminated escape in array literal".to_string()),
                        },
                        Some('"') => break,
                        Some(c) => atom.push(c),
                        None => return Err("unterminated quoted atom in array literal".to_string()),
                    }
                }
                atoms.push(Some(atom));
                // consume the delimiter after the closing quote
                while matches!(chars.peek(), Some(c) if c.is_whitespace()) {
                    chars.next();
                }
                match chars.next() {
                    None => break,
                    Some(',') => {}
                    Some(c) => return Err(format!("unexpected '{c}' after quoted atom")),
                }
            }
            Some(_) => {
                let mut atom = String::new();
                for c in chars.by_ref() {
                    if c == ',' {
                        break;
                    }
                    atom.push(c);
                }
                let atom = atom.trim().to_string();
                if atom == "NULL" {
                    atoms.push(None);
                } else {
                    atoms.push(Some(atom));
                }
                if chars.peek().is_none() {
                    break;
                }
            }
        }
    }
    Ok(atoms)
}
