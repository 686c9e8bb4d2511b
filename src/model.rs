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

//! The node data model: identity, labels, property values, and the node
//! body the codec and the handle table move around.

use std::{collections::HashMap, sync::Arc};

/// 64-bit node identity, unique within a graph instance and immutable for
/// the life of the node.
pub type NodeId = u64;

/// Interned schema tag. Cheap to clone and to hash: a graph typically has a
/// handful of distinct labels shared by every node of that kind.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Label(Arc<str>);

impl Label {
    pub fn new(s: impl Into<Arc<str>>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Label {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for Label {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl std::fmt::Display for Label {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// The closed set of primitive property value tags from spec §3, generic
/// over how a `NODE_REF` is represented: a raw [`NodeId`] before resolution
/// (what `encode` consumes and what an unresolved `decode` produces), or a
/// [`std::sync::Weak`] handle after resolution through the owning graph
/// (see `codec::NodeResolver`). Non-owning by design, see DESIGN.md's
/// "NODE_REF resolution ownership" note.
#[derive(Debug, Clone)]
pub enum Value<R = NodeId> {
    Null,
    Bool(bool),
    Str(String),
    Byte(u8),
    Short(i16),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Character(char),
    NodeRef(R),
    List(Vec<Value<R>>),
}

impl<R: PartialEq> PartialEq for Value<R> {
    fn eq(&self, other: &Self) -> bool {
        use Value::*;
        match (self, other) {
            (Null, Null) => true,
            (Bool(a), Bool(b)) => a == b,
            (Str(a), Str(b)) => a == b,
            (Byte(a), Byte(b)) => a == b,
            (Short(a), Short(b)) => a == b,
            (Int(a), Int(b)) => a == b,
            (Long(a), Long(b)) => a == b,
            (Float(a), Float(b)) => a == b,
            (Double(a), Double(b)) => a == b,
            (Character(a), Character(b)) => a == b,
            (NodeRef(a), NodeRef(b)) => a == b,
            (List(a), List(b)) => a == b,
            _ => false,
        }
    }
}

/// Raw, wire-shaped property value: what `Codec::encode` takes and what an
/// unresolved `Codec::decode` (no resolver, or ids the resolver could not
/// find) produces.
pub type RawValue = Value<NodeId>;

/// A materialized node. Generic over `R` for the same reason as [`Value`]:
/// a freshly-decoded body from `codec::decode_raw` carries raw `NodeId`s,
/// while one produced through a resolver carries resolved weak handles.
///
/// `properties` is a map (spec §3: "mapping string → value"); duplicate
/// keys cannot occur after decode because the wire format stores exactly
/// one entry per key (LIST values carry the multiplicity, flattened only by
/// the external schema layer, see spec §4.1's LIST handling note).
#[derive(Debug, Clone)]
pub struct NodeBody<R = NodeId> {
    pub id: NodeId,
    pub label: Label,
    pub properties: HashMap<String, Value<R>>,
    pub edge_offsets: Vec<i32>,
    pub adjacency: Vec<Value<R>>,
}

impl<R: PartialEq> PartialEq for NodeBody<R> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
            && self.label == other.label
            && self.properties == other.properties
            && self.edge_offsets == other.edge_offsets
            && self.adjacency == other.adjacency
    }
}

impl NodeBody<NodeId> {
    pub fn new(id: NodeId, label: impl Into<Label>) -> Self {
        Self {
            id,
            label: label.into(),
            properties: HashMap::new(),
            edge_offsets: Vec::new(),
            adjacency: Vec::new(),
        }
    }
}
