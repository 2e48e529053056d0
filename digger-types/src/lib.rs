use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Distinct identifiers referenced by one operation's text.
pub type FieldSet = BTreeSet<String>;

/// Declared variables of one call, as sent by the client.
pub type Variables = Map<String, Value>;

/// Every observed origin and its accumulated schema.
pub type Registry = BTreeMap<String, OriginSchema>;

/// Name under which operations without an `operationName` are counted.
pub const ANONYMOUS_OPERATION: &str = "anonymous";

/// Kind of a query-language operation, taken from its leading keyword.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationType {
    #[default]
    Query,
    Mutation,
    Subscription,
}

impl OperationType {
    pub const fn keyword(self) -> &'static str {
        match self {
            OperationType::Query => "query",
            OperationType::Mutation => "mutation",
            OperationType::Subscription => "subscription",
        }
    }

    /// Prefix check on the first word of the document; anything that is not
    /// `mutation` or `subscription` (shorthand `{ ... }`, fragments) is a query.
    pub fn detect(text: &str) -> Self {
        match leading_word(text) {
            "mutation" => OperationType::Mutation,
            "subscription" => OperationType::Subscription,
            _ => OperationType::Query,
        }
    }
}

impl std::fmt::Display for OperationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.keyword())
    }
}

fn leading_word(text: &str) -> &str {
    let mut rest = text;
    loop {
        rest = rest.trim_start();
        match rest.strip_prefix('#') {
            Some(comment) => rest = comment.split_once('\n').map_or("", |(_, tail)| tail),
            None => break,
        }
    }
    let end = rest
        .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .unwrap_or(rest.len());
    &rest[..end]
}

/// One classified operation, produced per traffic event and consumed by the aggregator.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationRecord {
    /// Verbatim `operationName`; empty when the client did not send one.
    pub operation_name: String,
    pub operation_type: OperationType,
    pub query_text: String,
    pub variables: Variables,
}

/// Raw request body as handed over by the interception host.
///
/// Variants are tried in order; any JSON the host already decoded and that fits
/// nothing narrower lands in `Json`, so no body shape rejects the whole event.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestBody {
    #[default]
    Empty,
    Text(String),
    Form(BTreeMap<String, String>),
    Bytes(Vec<u8>),
    Json(Value),
}

/// Inbound traffic event: one observed request and, optionally, its decoded response.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrafficEvent {
    pub url: String,
    pub method: String,
    #[serde(default)]
    pub body: RequestBody,
    #[serde(default, alias = "responsePayload")]
    pub response: Option<Value>,
}

/// Accumulated record of one `(origin, operation type, operation name)` key.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationEntry {
    /// Captured on first sighting only.
    pub fields: FieldSet,
    pub variables: Variables,
    pub count: u64,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

impl OperationEntry {
    /// Fresh entry with `count == 0`; callers follow up with [`OperationEntry::observe`].
    pub fn new(fields: FieldSet, variables: Variables, now: DateTime<Utc>) -> Self {
        Self {
            fields,
            variables,
            count: 0,
            first_seen: now,
            last_seen: now,
        }
    }

    /// Count one sighting. Variables follow the latest call; `last_seen` never moves backwards.
    pub fn observe(&mut self, variables: Variables, now: DateTime<Utc>) {
        self.count += 1;
        self.variables = variables;
        self.last_seen = self.last_seen.max(now);
    }
}

/// Leaf value kinds a response can carry.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrimitiveKind {
    String,
    Number,
    Boolean,
    Null,
    /// Element kind of an empty array.
    Unknown,
}

/// Element of an inferred list: a nested shape, or a bare primitive kind.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ListElement {
    Primitive(PrimitiveKind),
    Node(Box<TypeNode>),
}

/// Best-effort shape of a value seen in one response.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "shape", rename_all = "lowercase")]
pub enum TypeNode {
    Scalar {
        kind: PrimitiveKind,
        sample: String,
    },
    #[serde(rename = "list")]
    ListOf {
        #[serde(rename = "of")]
        element: ListElement,
    },
    #[serde(rename = "object")]
    ObjectShape {
        #[serde(rename = "fields")]
        field_names: FieldSet,
    },
}

/// Everything observed for one origin.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OriginSchema {
    pub queries: BTreeMap<String, OperationEntry>,
    pub mutations: BTreeMap<String, OperationEntry>,
    /// Keyed by bare field name; a later response overwrites an earlier shape.
    pub types: BTreeMap<String, TypeNode>,
    #[serde(default)]
    pub endpoints: BTreeSet<String>,
    pub request_count: u64,
    /// `None` only for the placeholder of an origin never observed.
    pub first_seen: Option<DateTime<Utc>>,
}

impl OriginSchema {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            first_seen: Some(now),
            ..Self::default()
        }
    }

    /// Bucket an operation type is tracked in. Subscriptions share the query bucket.
    pub fn bucket(&self, ty: OperationType) -> &BTreeMap<String, OperationEntry> {
        match ty {
            OperationType::Query | OperationType::Subscription => &self.queries,
            OperationType::Mutation => &self.mutations,
        }
    }

    pub fn bucket_mut(&mut self, ty: OperationType) -> &mut BTreeMap<String, OperationEntry> {
        match ty {
            OperationType::Query | OperationType::Subscription => &mut self.queries,
            OperationType::Mutation => &mut self.mutations,
        }
    }

    pub fn operation(&self, ty: OperationType, name: &str) -> Option<&OperationEntry> {
        self.bucket(ty).get(normalize_operation_name(name))
    }

    pub fn is_empty(&self) -> bool {
        self.request_count == 0 && self.queries.is_empty() && self.mutations.is_empty()
    }
}

/// Map an empty operation name onto [`ANONYMOUS_OPERATION`].
pub fn normalize_operation_name(name: &str) -> &str {
    if name.is_empty() {
        ANONYMOUS_OPERATION
    } else {
        name
    }
}
