//  Copyright 2024 Foyer Project Authors
//
//  Licensed under the Apache License, Version 2.0 (the "License");
//  you may not use this file except in compliance with the License.
//  You may obtain a copy of the License at
//
//  http://www.apache.org/licenses/LICENSE-2.0
//
//  Unless required by applicable law or agreed to in writing, software
//  distributed under the License is distributed on an "AS IS" BASIS,
//  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
//  See the License for the specific language governing permissions and
//  limitations under the License.

//! The node serialization codec (spec §4.1): a self-describing,
//! length-prefixed MessagePack-compatible frame for a node body.
//!
//! `encode` is total and deterministic modulo map iteration order. `decode`
//! rebuilds a full body; `decode_ref` reads only the `(id, label)` prefix,
//! used at startup to rebuild handles without materializing bodies.

use std::{
    io::{Cursor, Read},
    sync::Weak,
};

use rmp::{decode, encode};

use crate::{
    error::CodecError,
    handle::Handle,
    model::{Label, NodeBody, NodeId, RawValue, Value},
};

/// The closed tag set from spec §3, as the `int8` discriminant written
/// ahead of every tagged-value payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i8)]
enum Tag {
    Null = 0,
    Bool = 1,
    Str = 2,
    Byte = 3,
    Short = 4,
    Int = 5,
    Long = 6,
    Float = 7,
    Double = 8,
    Character = 9,
    NodeRef = 10,
    List = 11,
}

impl Tag {
    fn from_i8(v: i8) -> Result<Self, CodecError> {
        Ok(match v {
            0 => Tag::Null,
            1 => Tag::Bool,
            2 => Tag::Str,
            3 => Tag::Byte,
            4 => Tag::Short,
            5 => Tag::Int,
            6 => Tag::Long,
            7 => Tag::Float,
            8 => Tag::Double,
            9 => Tag::Character,
            10 => Tag::NodeRef,
            11 => Tag::List,
            other => return Err(CodecError::CorruptFormat(format!("unknown value tag {other}"))),
        })
    }
}

/// Resolves a [`NodeId`] carried by a `NODE_REF` property to a live, but
/// non-owning, handle (spec §9: adjacency is by identity, not ownership, to
/// avoid ownership cycles through handle bodies).
pub trait NodeResolver {
    fn resolve(&self, id: NodeId) -> Weak<Handle>;
}

/// Upper bound on any single map/array header's declared element count
/// (spec §4.1: "decode fails with CorruptFormat on... map/array size
/// exceeding a configured limit"). A header is attacker-controlled input;
/// this keeps a malformed `map32`/`array32` marker with a huge count from
/// driving an immediate multi-gigabyte `with_capacity` allocation before a
/// single element has actually been read.
const MAX_COLLECTION_LEN: u32 = 1 << 24;

fn map_err_write(e: impl std::fmt::Display) -> CodecError {
    CodecError::UnencodableValue(e.to_string())
}

fn map_err_read(e: impl std::fmt::Display) -> CodecError {
    CodecError::CorruptFormat(e.to_string())
}

/// Validate a decoded map/array/str header count against
/// [`MAX_COLLECTION_LEN`] before it is used to size an allocation.
fn checked_len(n: u32, what: &str) -> Result<usize, CodecError> {
    if n > MAX_COLLECTION_LEN {
        return Err(CodecError::CorruptFormat(format!(
            "{what} length {n} exceeds configured limit {MAX_COLLECTION_LEN}"
        )));
    }
    Ok(n as usize)
}

fn write_tagged(buf: &mut Vec<u8>, value: &RawValue) -> Result<(), CodecError> {
    encode::write_array_len(buf, 2).map_err(map_err_write)?;
    match value {
        Value::Null => {
            encode::write_i8(buf, Tag::Null as i8).map_err(map_err_write)?;
            encode::write_nil(buf).map_err(map_err_write)?;
        }
        Value::Bool(b) => {
            encode::write_i8(buf, Tag::Bool as i8).map_err(map_err_write)?;
            encode::write_bool(buf, *b).map_err(map_err_write)?;
        }
        Value::Str(s) => {
            encode::write_i8(buf, Tag::Str as i8).map_err(map_err_write)?;
            encode::write_str(buf, s).map_err(map_err_write)?;
        }
        Value::Byte(v) => {
            encode::write_i8(buf, Tag::Byte as i8).map_err(map_err_write)?;
            encode::write_uint(buf, *v as u64).map_err(map_err_write)?;
        }
        Value::Short(v) => {
            encode::write_i8(buf, Tag::Short as i8).map_err(map_err_write)?;
            encode::write_sint(buf, *v as i64).map_err(map_err_write)?;
        }
        Value::Int(v) => {
            encode::write_i8(buf, Tag::Int as i8).map_err(map_err_write)?;
            encode::write_sint(buf, *v as i64).map_err(map_err_write)?;
        }
        Value::Long(v) => {
            encode::write_i8(buf, Tag::Long as i8).map_err(map_err_write)?;
            encode::write_sint(buf, *v).map_err(map_err_write)?;
        }
        Value::Float(v) => {
            encode::write_i8(buf, Tag::Float as i8).map_err(map_err_write)?;
            encode::write_f32(buf, *v).map_err(map_err_write)?;
        }
        Value::Double(v) => {
            encode::write_i8(buf, Tag::Double as i8).map_err(map_err_write)?;
            encode::write_f64(buf, *v).map_err(map_err_write)?;
        }
        Value::Character(c) => {
            encode::write_i8(buf, Tag::Character as i8).map_err(map_err_write)?;
            encode::write_uint(buf, *c as u64).map_err(map_err_write)?;
        }
        Value::NodeRef(id) => {
            encode::write_i8(buf, Tag::NodeRef as i8).map_err(map_err_write)?;
            encode::write_uint(buf, *id).map_err(map_err_write)?;
        }
        Value::List(items) => {
            encode::write_i8(buf, Tag::List as i8).map_err(map_err_write)?;
            encode::write_array_len(buf, items.len() as u32).map_err(map_err_write)?;
            for item in items {
                write_tagged(buf, item)?;
            }
        }
    }
    Ok(())
}

/// Encode a node body to its canonical wire form (spec §4.1).
pub fn encode(body: &NodeBody<NodeId>) -> Result<Vec<u8>, CodecError> {
    let mut buf = Vec::new();

    encode::write_uint(&mut buf, body.id).map_err(map_err_write)?;
    encode::write_str(&mut buf, body.label.as_str()).map_err(map_err_write)?;

    encode::write_map_len(&mut buf, body.properties.len() as u32).map_err(map_err_write)?;
    for (key, value) in &body.properties {
        encode::write_str(&mut buf, key).map_err(map_err_write)?;
        write_tagged(&mut buf, value)?;
    }

    encode::write_array_len(&mut buf, body.edge_offsets.len() as u32).map_err(map_err_write)?;
    for off in &body.edge_offsets {
        encode::write_sint(&mut buf, *off as i64).map_err(map_err_write)?;
    }

    encode::write_array_len(&mut buf, body.adjacency.len() as u32).map_err(map_err_write)?;
    for value in &body.adjacency {
        write_tagged(&mut buf, value)?;
    }

    Ok(buf)
}

fn read_tagged(cur: &mut Cursor<&[u8]>) -> Result<RawValue, CodecError> {
    let len = decode::read_array_len(cur).map_err(map_err_read)?;
    if len != 2 {
        return Err(CodecError::CorruptFormat(format!(
            "tagged value frame must have 2 elements, got {len}"
        )));
    }
    let tag = Tag::from_i8(decode::read_i8(cur).map_err(map_err_read)?)?;
    let value = match tag {
        Tag::Null => {
            decode::read_nil(cur).map_err(map_err_read)?;
            Value::Null
        }
        Tag::Bool => Value::Bool(decode::read_bool(cur).map_err(map_err_read)?),
        Tag::Str => Value::Str(read_str(cur)?),
        Tag::Byte => Value::Byte(decode::read_int(cur).map_err(map_err_read)?),
        Tag::Short => Value::Short(decode::read_int(cur).map_err(map_err_read)?),
        Tag::Int => Value::Int(decode::read_int(cur).map_err(map_err_read)?),
        Tag::Long => Value::Long(decode::read_int(cur).map_err(map_err_read)?),
        Tag::Float => Value::Float(decode::read_f32(cur).map_err(map_err_read)?),
        Tag::Double => Value::Double(decode::read_f64(cur).map_err(map_err_read)?),
        Tag::Character => {
            let code: u32 = decode::read_int(cur).map_err(map_err_read)?;
            Value::Character(
                char::from_u32(code)
                    .ok_or_else(|| CodecError::CorruptFormat(format!("invalid char codepoint {code}")))?,
            )
        }
        Tag::NodeRef => Value::NodeRef(decode::read_int(cur).map_err(map_err_read)?),
        Tag::List => {
            let n = checked_len(decode::read_array_len(cur).map_err(map_err_read)?, "list")?;
            let mut items = Vec::with_capacity(n);
            for _ in 0..n {
                items.push(read_tagged(cur)?);
            }
            Value::List(items)
        }
    };
    Ok(value)
}

fn read_str(cur: &mut Cursor<&[u8]>) -> Result<String, CodecError> {
    let len = checked_len(decode::read_str_len(cur).map_err(map_err_read)?, "string")?;
    let mut bytes = vec![0u8; len];
    cur.read_exact(&mut bytes).map_err(map_err_read)?;
    String::from_utf8(bytes).map_err(|e| CodecError::CorruptFormat(e.to_string()))
}

fn read_prefix(cur: &mut Cursor<&[u8]>) -> Result<(NodeId, Label), CodecError> {
    let id: NodeId = decode::read_int(cur).map_err(map_err_read)?;
    let label = read_str(cur)?;
    Ok((id, Label::new(label)))
}

/// Read only the `(id, label)` prefix without materializing the rest of the
/// record, used during startup rebuild to register handles without loading
/// bodies (spec §4.1, §6).
pub fn decode_ref(bytes: &[u8]) -> Result<(NodeId, Label), CodecError> {
    let mut cur = Cursor::new(bytes);
    read_prefix(&mut cur)
}

/// Decode a full node body, leaving `NODE_REF` values as raw [`NodeId`]s.
pub fn decode_raw(bytes: &[u8]) -> Result<NodeBody<NodeId>, CodecError> {
    let mut cur = Cursor::new(bytes);
    let (id, label) = read_prefix(&mut cur)?;

    let n_props = checked_len(decode::read_map_len(&mut cur).map_err(map_err_read)?, "properties map")?;
    let mut properties = std::collections::HashMap::with_capacity(n_props);
    for _ in 0..n_props {
        let key = read_str(&mut cur)?;
        let value = read_tagged(&mut cur)?;
        properties.insert(key, value);
    }

    let n_edges = checked_len(decode::read_array_len(&mut cur).map_err(map_err_read)?, "edgeOffsets array")?;
    let mut edge_offsets = Vec::with_capacity(n_edges);
    for _ in 0..n_edges {
        let off: i32 = decode::read_int(&mut cur).map_err(map_err_read)?;
        edge_offsets.push(off);
    }

    let n_adj = checked_len(decode::read_array_len(&mut cur).map_err(map_err_read)?, "adjacency array")?;
    let mut adjacency = Vec::with_capacity(n_adj);
    for _ in 0..n_adj {
        adjacency.push(read_tagged(&mut cur)?);
    }

    Ok(NodeBody {
        id,
        label,
        properties,
        edge_offsets,
        adjacency,
    })
}

fn resolve_value(value: Value<NodeId>, resolver: &dyn NodeResolver) -> Value<Weak<Handle>> {
    match value {
        Value::Null => Value::Null,
        Value::Bool(b) => Value::Bool(b),
        Value::Str(s) => Value::Str(s),
        Value::Byte(v) => Value::Byte(v),
        Value::Short(v) => Value::Short(v),
        Value::Int(v) => Value::Int(v),
        Value::Long(v) => Value::Long(v),
        Value::Float(v) => Value::Float(v),
        Value::Double(v) => Value::Double(v),
        Value::Character(c) => Value::Character(c),
        Value::NodeRef(id) => Value::NodeRef(resolver.resolve(id)),
        Value::List(items) => Value::List(items.into_iter().map(|v| resolve_value(v, resolver)).collect()),
    }
}

/// Decode a full node body, resolving every `NODE_REF` property to a live
/// (non-owning) handle through `resolver`.
pub fn decode(bytes: &[u8], resolver: &dyn NodeResolver) -> Result<NodeBody<Weak<Handle>>, CodecError> {
    let raw = decode_raw(bytes)?;
    let properties = raw
        .properties
        .into_iter()
        .map(|(k, v)| (k, resolve_value(v, resolver)))
        .collect();
    let adjacency = raw.adjacency.into_iter().map(|v| resolve_value(v, resolver)).collect();
    Ok(NodeBody {
        id: raw.id,
        label: raw.label,
        properties,
        edge_offsets: raw.edge_offsets,
        adjacency,
    })
}

/// Flatten `LIST` property values into repeated `(key, value)` pairs, the
/// way the external schema layer sees a node's multi-valued properties
/// (spec §4.1's LIST handling note). A nested list is flattened
/// recursively even though the canonical encoding never produces one.
pub fn flatten_properties<R: Clone>(body: &NodeBody<R>) -> Vec<(String, Value<R>)> {
    let mut out = Vec::with_capacity(body.properties.len());
    for (key, value) in &body.properties {
        flatten_into(key, value, &mut out);
    }
    out
}

fn flatten_into<R: Clone>(key: &str, value: &Value<R>, out: &mut Vec<(String, Value<R>)>) {
    match value {
        Value::List(items) => {
            for item in items {
                flatten_into(key, item, out);
            }
        }
        other => out.push((key.to_string(), other.clone())),
    }
}
