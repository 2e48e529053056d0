use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::debug_span;

use digger_classifier::{endpoint_of, origin_of, Classifier};
use digger_store::SchemaAggregator;
use digger_types::{OperationRecord, OperationType, OriginSchema, Registry, TrafficEvent};

pub mod config;
pub use config::{ConfigError, DiggerConfig};

/// One operation taken from an event.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordedOperation {
    pub operation_name: String,
    pub operation_type: OperationType,
}

/// Outcome of feeding one traffic event through the digger.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Observation {
    Ignored,
    Recorded {
        origin: String,
        operations: Vec<RecordedOperation>,
    },
}

impl Observation {
    pub fn is_recorded(&self) -> bool {
        matches!(self, Observation::Recorded { .. })
    }
}

/// Classifier and aggregator wired together: raw traffic in, per-origin schema out.
///
/// Owns its state; share it behind an `Arc` between observation points.
pub struct SchemaDigger {
    classifier: Classifier,
    aggregator: SchemaAggregator,
}

impl Default for SchemaDigger {
    fn default() -> Self {
        Self::new(Classifier::default(), SchemaAggregator::default())
    }
}

impl SchemaDigger {
    pub fn new(classifier: Classifier, aggregator: SchemaAggregator) -> Self {
        Self {
            classifier,
            aggregator,
        }
    }

    pub fn from_config(cfg: &DiggerConfig) -> Self {
        Self::new(
            Classifier::new(cfg.classifier.clone()),
            SchemaAggregator::new(cfg.extraction, cfg.inference),
        )
    }

    pub fn classifier(&self) -> &Classifier {
        &self.classifier
    }

    pub fn aggregator(&self) -> &SchemaAggregator {
        &self.aggregator
    }

    /// Classify one event and merge whatever it carries. Never fails: events
    /// that are not operations are ignored.
    pub fn observe(&self, event: &TrafficEvent) -> Observation {
        self.observe_at(event, Utc::now())
    }

    pub fn observe_at(&self, event: &TrafficEvent, now: DateTime<Utc>) -> Observation {
        let records = self
            .classifier
            .classify_batch(&event.url, &event.method, &event.body);
        if records.is_empty() {
            return Observation::Ignored;
        }

        let origin = origin_of(&event.url);
        let endpoint = endpoint_of(&event.url);
        let span = debug_span!("observe", %origin, operations = records.len());
        let _enter = span.enter();

        for (idx, record) in records.iter().enumerate() {
            let response = response_for(event.response.as_ref(), idx, records.len());
            self.aggregator
                .record_at(&origin, Some(&endpoint), record, response, now);
        }

        Observation::Recorded {
            origin,
            operations: records.iter().map(recorded).collect(),
        }
    }

    pub fn get_schema(&self, origin: &str) -> OriginSchema {
        self.aggregator.get_schema(origin)
    }

    pub fn registry(&self) -> Registry {
        self.aggregator.registry()
    }

    pub fn list_origins(&self) -> Vec<String> {
        self.aggregator.list_origins()
    }

    pub fn reset(&self, origin: Option<&str>) {
        self.aggregator.reset(origin)
    }
}

/// Batched requests are answered by an array of responses, paired by position.
fn response_for(response: Option<&Value>, idx: usize, batch_len: usize) -> Option<&Value> {
    match response {
        Some(Value::Array(items)) => items.get(idx),
        Some(single) if batch_len == 1 => Some(single),
        _ => None,
    }
}

fn recorded(record: &OperationRecord) -> RecordedOperation {
    RecordedOperation {
        operation_name: digger_types::normalize_operation_name(&record.operation_name).to_string(),
        operation_type: record.operation_type,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use digger_extract::ExtractionStrategy;
    use digger_types::{RequestBody, TypeNode};
    use serde_json::json;

    fn post(url: &str, body: &str, response: Option<Value>) -> TrafficEvent {
        TrafficEvent {
            url: url.into(),
            method: "POST".into(),
            body: RequestBody::Text(body.into()),
            response,
        }
    }

    #[test]
    fn event_flows_into_its_origin() {
        let digger = SchemaDigger::default();
        let event = post(
            "https://rickandmortyapi.com/graphql?x=1",
            r#"{"query":"query Characters { characters { results { name } } }","operationName":"Characters"}"#,
            Some(json!({"data": {"characters": {"results": [{"name": "Rick"}]}}})),
        );
        let observation = digger.observe(&event);
        assert_eq!(
            observation,
            Observation::Recorded {
                origin: "https://rickandmortyapi.com".into(),
                operations: vec![RecordedOperation {
                    operation_name: "Characters".into(),
                    operation_type: OperationType::Query,
                }],
            }
        );

        let schema = digger.get_schema("https://rickandmortyapi.com");
        assert_eq!(schema.queries["Characters"].count, 1);
        assert!(schema.endpoints.contains("https://rickandmortyapi.com/graphql"));
        assert!(matches!(schema.types["results"], TypeNode::ListOf { .. }));
    }

    #[test]
    fn non_operations_touch_nothing() {
        let digger = SchemaDigger::default();
        let mut get = post("https://a.test/graphql", r#"{"query":"{ a }"}"#, None);
        get.method = "GET".into();
        assert_eq!(digger.observe(&get), Observation::Ignored);
        assert_eq!(
            digger.observe(&post("https://a.test/login", r#"{"user":"x"}"#, None)),
            Observation::Ignored
        );
        assert!(digger.list_origins().is_empty());
    }

    #[test]
    fn batches_pair_responses_by_position() {
        let digger = SchemaDigger::default();
        let event = post(
            "https://a.test/graphql",
            r#"[{"query":"query A { a }","operationName":"A"},{"query":"mutation B { b }","operationName":"B"}]"#,
            Some(json!([{"data": {"a": 1}}, {"data": {"b": "x"}}])),
        );
        let observation = digger.observe(&event);
        assert!(observation.is_recorded());

        let schema = digger.get_schema("https://a.test");
        assert_eq!(schema.queries["A"].count, 1);
        assert_eq!(schema.mutations["B"].count, 1);
        assert_eq!(schema.request_count, 2);
        assert!(schema.types.contains_key("a"));
        assert!(schema.types.contains_key("b"));
    }

    #[test]
    fn decoded_json_bodies_are_observed() {
        let digger = SchemaDigger::default();
        let event: TrafficEvent = serde_json::from_value(json!({
            "url": "https://a.test/graphql",
            "method": "POST",
            "body": {
                "query": "query Me($id: ID) { me(id: $id) { name } }",
                "operationName": "Me",
                "variables": {"id": 1}
            },
            "response": {"data": {"me": {"name": "Rick"}}}
        }))
        .unwrap();
        assert!(digger.observe(&event).is_recorded());

        let schema = digger.get_schema("https://a.test");
        assert_eq!(schema.queries["Me"].variables.get("id"), Some(&json!(1)));
        assert!(schema.types.contains_key("name"));

        let scalar: TrafficEvent =
            serde_json::from_value(json!({"url": "https://a.test/graphql", "method": "POST", "body": 42})).unwrap();
        assert_eq!(digger.observe(&scalar), Observation::Ignored);
    }

    #[test]
    fn config_selects_extraction_strategy() {
        let cfg = DiggerConfig {
            extraction: ExtractionStrategy::StructuralAnchor,
            ..DiggerConfig::default()
        };
        let digger = SchemaDigger::from_config(&cfg);
        digger.observe(&post("https://a.test/graphql", "query{me{id}}", None));
        assert!(digger.get_schema("https://a.test").queries["anonymous"].fields.is_empty());
    }
}
