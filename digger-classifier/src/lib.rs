//! Decides whether an observed request carries a query-language operation.
//!
//! Nothing here parses the query language itself: a cheap substring gate
//! followed by an optional JSON envelope unwrap is all the evidence used.

use std::borrow::Cow;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::debug;
use url::Url;

use digger_types::{OperationRecord, OperationType, RequestBody, Variables};

/// Which requests are eligible at all.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ClassifierPolicy {
    /// Body-carrying methods to inspect, compared case-insensitively.
    pub methods: Vec<String>,
}

impl Default for ClassifierPolicy {
    fn default() -> Self {
        Self {
            methods: vec!["POST".into()],
        }
    }
}

impl ClassifierPolicy {
    pub fn accepts(&self, method: &str) -> bool {
        self.methods.iter().any(|m| m.eq_ignore_ascii_case(method))
    }
}

/// Why a request was not taken as an operation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Rejection {
    #[error("method {0} is not inspected")]
    Method(String),
    #[error("no candidate text in request body")]
    NoCandidate,
    #[error("request body is not utf-8")]
    Undecodable,
    #[error("candidate text mentions neither query nor mutation")]
    NoKeyword,
}

#[derive(Clone, Debug, Default)]
pub struct Classifier {
    policy: ClassifierPolicy,
}

impl Classifier {
    pub fn new(policy: ClassifierPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &ClassifierPolicy {
        &self.policy
    }

    /// First operation carried by the request, or `None`.
    pub fn classify(&self, url: &str, method: &str, body: &RequestBody) -> Option<OperationRecord> {
        self.classify_batch(url, method, body).into_iter().next()
    }

    /// Every operation carried by the request; batched envelopes yield several.
    pub fn classify_batch(&self, url: &str, method: &str, body: &RequestBody) -> Vec<OperationRecord> {
        match self.try_classify_batch(method, body) {
            Ok(records) => records,
            Err(reason) => {
                debug!(url, method, %reason, "not an operation");
                Vec::new()
            }
        }
    }

    pub fn try_classify(&self, method: &str, body: &RequestBody) -> Result<OperationRecord, Rejection> {
        self.try_classify_batch(method, body)?
            .into_iter()
            .next()
            .ok_or(Rejection::NoCandidate)
    }

    pub fn try_classify_batch(
        &self,
        method: &str,
        body: &RequestBody,
    ) -> Result<Vec<OperationRecord>, Rejection> {
        if !self.policy.accepts(method) {
            return Err(Rejection::Method(method.to_string()));
        }
        let text = candidate_text(body)?;
        if !mentions_operation(&text) {
            return Err(Rejection::NoKeyword);
        }

        match serde_json::from_str::<Value>(&text) {
            Ok(Value::Object(envelope)) => Ok(vec![from_envelope(&envelope)]),
            Ok(Value::Array(items)) => {
                let records: Vec<_> = items
                    .iter()
                    .filter_map(Value::as_object)
                    .map(from_envelope)
                    .collect();
                if records.is_empty() {
                    Ok(vec![from_raw(&text)])
                } else {
                    Ok(records)
                }
            }
            // Not an envelope: the body is the operation text itself.
            _ => Ok(vec![from_raw(&text)]),
        }
    }
}

/// Classify with the default policy (POST only).
pub fn classify(url: &str, method: &str, body: &RequestBody) -> Option<OperationRecord> {
    Classifier::default().classify(url, method, body)
}

fn candidate_text(body: &RequestBody) -> Result<Cow<'_, str>, Rejection> {
    let text = match body {
        RequestBody::Empty => return Err(Rejection::NoCandidate),
        RequestBody::Text(text) => Cow::Borrowed(text.as_str()),
        // A form with a `query` field is itself the envelope, so `operationName` survives.
        RequestBody::Form(fields) if fields.contains_key("query") => {
            Cow::Owned(serde_json::to_string(fields).map_err(|_| Rejection::NoCandidate)?)
        }
        RequestBody::Form(fields) => fields
            .get("variables")
            .map(|v| Cow::Borrowed(v.as_str()))
            .ok_or(Rejection::NoCandidate)?,
        RequestBody::Bytes(bytes) => {
            Cow::Borrowed(std::str::from_utf8(bytes).map_err(|_| Rejection::Undecodable)?)
        }
        // Already decoded by the host; re-encode so envelopes and batches take the text path.
        RequestBody::Json(value @ (Value::Object(_) | Value::Array(_))) => Cow::Owned(value.to_string()),
        RequestBody::Json(_) => return Err(Rejection::NoCandidate),
    };
    if text.trim().is_empty() {
        return Err(Rejection::NoCandidate);
    }
    Ok(text)
}

fn mentions_operation(text: &str) -> bool {
    let lowered = text.to_lowercase();
    lowered.contains("query") || lowered.contains("mutation")
}

fn from_envelope(envelope: &Map<String, Value>) -> OperationRecord {
    let query_text = envelope
        .get("query")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let operation_name = envelope
        .get("operationName")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let variables = match envelope.get("variables") {
        Some(Value::Object(vars)) => vars.clone(),
        // Form transports sometimes double-encode the variables object.
        Some(Value::String(encoded)) => serde_json::from_str(encoded).unwrap_or_default(),
        _ => Variables::new(),
    };
    OperationRecord {
        operation_name,
        operation_type: OperationType::detect(&query_text),
        query_text,
        variables,
    }
}

fn from_raw(text: &str) -> OperationRecord {
    OperationRecord {
        operation_name: String::new(),
        operation_type: OperationType::detect(text),
        query_text: text.to_string(),
        variables: Variables::new(),
    }
}

/// Scheme, host and port of `url`. Anything without a tuple origin is its own origin.
pub fn origin_of(url: &str) -> String {
    match Url::parse(url) {
        Ok(parsed) if parsed.origin().is_tuple() => parsed.origin().ascii_serialization(),
        _ => url.to_string(),
    }
}

/// `url` without its query string and fragment.
pub fn endpoint_of(url: &str) -> String {
    match Url::parse(url) {
        Ok(mut parsed) => {
            parsed.set_query(None);
            parsed.set_fragment(None);
            parsed.to_string()
        }
        Err(_) => url.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    const URL: &str = "https://rickandmortyapi.com/graphql";

    fn text(body: &str) -> RequestBody {
        RequestBody::Text(body.to_string())
    }

    #[test]
    fn envelope_is_unwrapped() {
        let body = text(
            r#"{"query":"query GetCharacter($id: ID!) { character(id: $id) { name } }","operationName":"GetCharacter","variables":{"id":"1"}}"#,
        );
        let record = classify(URL, "POST", &body).expect("operation");
        assert_eq!(record.operation_name, "GetCharacter");
        assert_eq!(record.operation_type, OperationType::Query);
        assert_eq!(record.variables.get("id"), Some(&Value::from("1")));
        assert!(record.query_text.starts_with("query GetCharacter"));
    }

    #[test]
    fn mutation_type_comes_from_leading_keyword() {
        let body = text(r#"{"query":"  mutation Save { save { ok } }"}"#);
        let record = classify(URL, "POST", &body).unwrap();
        assert_eq!(record.operation_type, OperationType::Mutation);
        assert_eq!(record.operation_name, "");
        assert!(record.variables.is_empty());
    }

    #[test]
    fn only_post_is_inspected_by_default() {
        let body = text(r#"{"query":"{ me { id } }"}"#);
        assert!(classify(URL, "GET", &body).is_none());
        assert!(classify(URL, "post", &body).is_some());
        assert_eq!(
            Classifier::default().try_classify("GET", &body),
            Err(Rejection::Method("GET".into()))
        );
    }

    #[test]
    fn policy_can_admit_more_methods() {
        let classifier = Classifier::new(ClassifierPolicy {
            methods: vec!["POST".into(), "PUT".into()],
        });
        assert!(classifier.classify(URL, "PUT", &text("query { me }")).is_some());
    }

    #[test]
    fn raw_operation_text_falls_back() {
        let record = classify(URL, "POST", &text("mutation { logout }")).unwrap();
        assert_eq!(record.query_text, "mutation { logout }");
        assert_eq!(record.operation_type, OperationType::Mutation);
        assert_eq!(record.operation_name, "");
        assert!(record.variables.is_empty());
    }

    #[test]
    fn malformed_json_takes_the_fallback_path() {
        let body = text(r#"{"query": "query { me }""#);
        let record = classify(URL, "POST", &body).unwrap();
        assert_eq!(record.query_text, r#"{"query": "query { me }""#);
    }

    #[test]
    fn keyword_gate_rejects_unrelated_bodies() {
        let classifier = Classifier::default();
        assert_eq!(
            classifier.try_classify("POST", &text(r#"{"user":"rick"}"#)),
            Err(Rejection::NoKeyword)
        );
        assert_eq!(classifier.try_classify("POST", &RequestBody::Empty), Err(Rejection::NoCandidate));
        assert_eq!(classifier.try_classify("POST", &text("   ")), Err(Rejection::NoCandidate));
    }

    #[test]
    fn undecodable_bytes_are_rejected() {
        let body = RequestBody::Bytes(vec![0xff, 0xfe, b'q']);
        assert_eq!(Classifier::default().try_classify("POST", &body), Err(Rejection::Undecodable));
        assert!(classify(URL, "POST", &body).is_none());
    }

    #[test]
    fn utf8_bytes_are_decoded() {
        let body = RequestBody::Bytes(br#"{"query":"query Q { a }","operationName":"Q"}"#.to_vec());
        assert_eq!(classify(URL, "POST", &body).unwrap().operation_name, "Q");
    }

    #[test]
    fn form_prefers_query_then_variables() {
        let mut fields = BTreeMap::new();
        fields.insert("query".to_string(), "query Me { me { id } }".to_string());
        fields.insert("variables".to_string(), "{}".to_string());
        fields.insert("operationName".to_string(), "Me".to_string());
        let record = classify(URL, "POST", &RequestBody::Form(fields)).unwrap();
        assert_eq!(record.query_text, "query Me { me { id } }");
        assert_eq!(record.operation_name, "Me");

        let mut only_vars = BTreeMap::new();
        only_vars.insert("variables".to_string(), r#"{"query":"mutation M { m }"}"#.to_string());
        let record = classify(URL, "POST", &RequestBody::Form(only_vars)).unwrap();
        assert_eq!(record.operation_type, OperationType::Mutation);

        let mut neither = BTreeMap::new();
        neither.insert("q".to_string(), "query { x }".to_string());
        assert_eq!(
            Classifier::default().try_classify("POST", &RequestBody::Form(neither)),
            Err(Rejection::NoCandidate)
        );
    }

    #[test]
    fn string_encoded_variables_are_decoded() {
        let body = text(r#"{"query":"query Q($n: Int) { q(n: $n) }","variables":"{\"n\":3}"}"#);
        let record = classify(URL, "POST", &body).unwrap();
        assert_eq!(record.variables.get("n"), Some(&Value::from(3)));
    }

    #[test]
    fn batched_envelopes_yield_every_operation() {
        let body = text(
            r#"[{"query":"query A { a }","operationName":"A"},{"query":"mutation B { b }","operationName":"B"},7]"#,
        );
        let records = Classifier::default().classify_batch(URL, "POST", &body);
        let names: Vec<_> = records.iter().map(|r| r.operation_name.as_str()).collect();
        assert_eq!(names, ["A", "B"]);
        assert_eq!(records[1].operation_type, OperationType::Mutation);
        assert_eq!(classify(URL, "POST", &body).unwrap().operation_name, "A");
    }

    #[test]
    fn decoded_envelopes_keep_nested_variables() {
        let body = RequestBody::Json(serde_json::json!({
            "query": "query Me($id: ID) { me(id: $id) { id } }",
            "operationName": "Me",
            "variables": {"id": 1, "filter": {"active": true}}
        }));
        let record = classify(URL, "POST", &body).unwrap();
        assert_eq!(record.operation_name, "Me");
        assert_eq!(record.variables.get("id"), Some(&Value::from(1)));
        assert_eq!(record.variables["filter"]["active"], Value::Bool(true));

        let batch = RequestBody::Json(serde_json::json!([
            {"query": "query A { a }", "operationName": "A"},
            {"query": "query B { b }", "operationName": "B"}
        ]));
        assert_eq!(Classifier::default().classify_batch(URL, "POST", &batch).len(), 2);
    }

    #[test]
    fn decoded_scalars_are_not_candidates() {
        let classifier = Classifier::default();
        for value in [Value::from(42), Value::Bool(true), Value::Null] {
            assert_eq!(
                classifier.try_classify("POST", &RequestBody::Json(value)),
                Err(Rejection::NoCandidate)
            );
        }
    }

    #[test]
    fn arrays_without_envelopes_take_the_fallback_path() {
        let body = text(r#"["query { a }"]"#);
        let records = Classifier::default().classify_batch(URL, "POST", &body);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].query_text, r#"["query { a }"]"#);
        assert_eq!(records[0].operation_name, "");
    }

    #[test]
    fn origin_is_scheme_host_and_port() {
        assert_eq!(origin_of("https://api.test/graphql?x=1"), "https://api.test");
        assert_eq!(origin_of("http://localhost:4000/gql"), "http://localhost:4000");
        assert_eq!(origin_of("https://api.test:443/graphql"), "https://api.test");
        assert_eq!(origin_of("apollo"), "apollo");
    }

    #[test]
    fn endpoint_drops_query_and_fragment() {
        assert_eq!(endpoint_of("https://api.test/graphql?op=Q#x"), "https://api.test/graphql");
        assert_eq!(endpoint_of("/graphql"), "/graphql");
    }
}
