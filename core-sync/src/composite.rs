//! Composite correlator
//!
//! Sends an ordered list of record requests in one round trip and returns the
//! sub-responses keyed by reference id. A later request may refer to the id
//! created by an earlier one through `@{referenceId.id}`.
//!
//! The same contract is offered over sObject Collections: requests are grouped
//! by kind, sent in chunks, and the per-record results are turned back into
//! sub-responses with the status codes a single-record call would have given.

use provider_rest::{
    CollectionResult, CompositeResponse, RestClient, RestRequest, MAX_COLLECTION_RECORDS,
};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use tracing::{debug, instrument};

use crate::error::Result;
use crate::request::RecordRequest;

/// Status recorded for a request the server never answered
pub const NOT_ATTEMPTED: i32 = -1;

const ENTITY_IS_DELETED: &str = "ENTITY_IS_DELETED";
const INVALID_CROSS_REFERENCE_KEY: &str = "INVALID_CROSS_REFERENCE_KEY";

/// Answer to one request of a composite (or collection) call
#[derive(Debug, Clone, PartialEq)]
pub struct SubResponse {
    pub reference_id: String,
    pub http_status_code: i32,
    pub http_headers: HashMap<String, String>,
    pub body: Value,
}

impl SubResponse {
    pub fn new(reference_id: impl Into<String>, http_status_code: i32, body: Value) -> Self {
        Self {
            reference_id: reference_id.into(),
            http_status_code,
            http_headers: HashMap::new(),
            body,
        }
    }

    pub fn not_attempted(reference_id: impl Into<String>) -> Self {
        Self::new(reference_id, NOT_ATTEMPTED, Value::Null)
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.http_status_code)
    }

    pub fn is_not_found(&self) -> bool {
        self.http_status_code == 404
    }

    /// `true` when the body is an error list holding `error_code`.
    pub fn has_error_code(&self, error_code: &str) -> bool {
        self.body
            .as_array()
            .map(|errors| {
                errors
                    .iter()
                    .any(|e| e.get("errorCode").and_then(Value::as_str) == Some(error_code))
            })
            .unwrap_or(false)
    }

    /// `id` carried in the body, if any.
    pub fn body_id(&self) -> Option<&str> {
        self.body.get("id").and_then(Value::as_str)
    }

    /// Text stored as the record's last error.
    pub fn error_text(&self) -> String {
        if self.body.is_null() {
            format!("no response (status {})", self.http_status_code)
        } else {
            self.body.to_string()
        }
    }
}

/// Reference to the id created by another subrequest of the same call.
pub fn reference_to_id(reference_id: &str) -> String {
    format!("@{{{}.id}}", reference_id)
}

/// Map reference id to server id for every 201 sub-response carrying an id.
pub fn extract_server_ids(responses: &HashMap<String, SubResponse>) -> HashMap<String, String> {
    responses
        .iter()
        .filter(|(_, response)| response.http_status_code == 201)
        .filter_map(|(reference_id, response)| {
            response
                .body_id()
                .map(|id| (reference_id.clone(), id.to_string()))
        })
        .collect()
}

/// Replace the value of `field` through `id_map` when it matches a key.
///
/// Returns `true` when the field was rewritten.
pub fn resolve_reference(
    record: &mut Map<String, Value>,
    field: &str,
    id_map: &HashMap<String, String>,
) -> bool {
    let resolved = record
        .get(field)
        .and_then(Value::as_str)
        .and_then(|current| id_map.get(current))
        .cloned();

    match resolved {
        Some(id) => {
            record.insert(field.to_string(), Value::String(id));
            true
        }
        None => false,
    }
}

/// Sends record requests in one round trip.
pub struct CompositeCorrelator<'a> {
    client: &'a RestClient,
}

impl<'a> CompositeCorrelator<'a> {
    pub fn new(client: &'a RestClient) -> Self {
        Self { client }
    }

    /// One composite call, subrequests in the given order.
    ///
    /// # Errors
    ///
    /// Transport failures, a non-success status on the composite call itself,
    /// more than 25 requests, or an unreadable body.
    #[instrument(skip(self, requests), fields(count = requests.len()))]
    pub async fn send(
        &self,
        all_or_none: bool,
        requests: &[(String, RecordRequest)],
    ) -> Result<HashMap<String, SubResponse>> {
        let api_version = self.client.api_version();
        let subrequests: Vec<(String, RestRequest)> = requests
            .iter()
            .map(|(reference_id, request)| {
                (reference_id.clone(), request.to_rest_request(api_version))
            })
            .collect();

        let call = RestRequest::composite(api_version, all_or_none, &subrequests)?;
        let response: CompositeResponse = self.client.send_checked(call).await?.json()?;

        debug!(
            responses = response.composite_response.len(),
            "Composite call answered"
        );

        Ok(response
            .composite_response
            .into_iter()
            .map(|sub| {
                (
                    sub.reference_id.clone(),
                    SubResponse {
                        reference_id: sub.reference_id,
                        http_status_code: sub.http_status_code,
                        http_headers: sub.http_headers,
                        body: sub.body,
                    },
                )
            })
            .collect())
    }

    /// Same contract as [`send`](Self::send) over sObject Collections.
    ///
    /// Requests are grouped into creates, upserts (per type and external id
    /// field), updates and deletes, each sent in chunks of 200. References
    /// between requests are not supported on this path.
    #[instrument(skip(self, requests), fields(count = requests.len()))]
    pub async fn send_as_collection(
        &self,
        all_or_none: bool,
        requests: &[(String, RecordRequest)],
    ) -> Result<HashMap<String, SubResponse>> {
        let api_version = self.client.api_version();

        let mut creates: Vec<(String, String, Map<String, Value>)> = Vec::new();
        let mut upserts: Vec<((String, String), Vec<(String, Map<String, Value>)>)> = Vec::new();
        let mut updates: Vec<(String, String, Map<String, Value>)> = Vec::new();
        let mut deletes: Vec<(String, String)> = Vec::new();

        for (reference_id, request) in requests {
            match request {
                RecordRequest::Create {
                    object_type,
                    fields,
                } => creates.push((reference_id.clone(), object_type.clone(), fields.clone())),
                RecordRequest::Upsert {
                    object_type,
                    external_id_field,
                    external_id,
                    fields,
                } => {
                    let mut fields = fields.clone();
                    fields.insert(external_id_field.clone(), Value::from(external_id.as_str()));
                    let key = (object_type.clone(), external_id_field.clone());
                    match upserts.iter_mut().find(|(k, _)| *k == key) {
                        Some((_, group)) => group.push((reference_id.clone(), fields)),
                        None => upserts.push((key, vec![(reference_id.clone(), fields)])),
                    }
                }
                RecordRequest::Update {
                    object_type,
                    id,
                    fields,
                } => {
                    let mut fields = fields.clone();
                    fields.insert("Id".to_string(), Value::from(id.as_str()));
                    updates.push((reference_id.clone(), object_type.clone(), fields));
                }
                RecordRequest::Delete { id, .. } => {
                    deletes.push((reference_id.clone(), id.clone()))
                }
            }
        }

        let mut responses = HashMap::new();

        for chunk in creates.chunks(MAX_COLLECTION_RECORDS) {
            let records = chunk
                .iter()
                .map(|(_, object_type, fields)| (object_type.clone(), fields.clone()))
                .collect();
            let call = RestRequest::collection_create(api_version, all_or_none, records)?;
            let results = self.send_collection(call).await?;
            correlate(chunk.iter().map(|(r, _, _)| r), results, Kind::Create, &mut responses);
        }

        for ((object_type, external_id_field), group) in &upserts {
            for chunk in group.chunks(MAX_COLLECTION_RECORDS) {
                let records = chunk.iter().map(|(_, fields)| fields.clone()).collect();
                let call = RestRequest::collection_upsert(
                    api_version,
                    all_or_none,
                    object_type,
                    external_id_field,
                    records,
                )?;
                let results = self.send_collection(call).await?;
                correlate(chunk.iter().map(|(r, _)| r), results, Kind::Upsert, &mut responses);
            }
        }

        for chunk in updates.chunks(MAX_COLLECTION_RECORDS) {
            let records = chunk
                .iter()
                .map(|(_, object_type, fields)| (object_type.clone(), fields.clone()))
                .collect();
            let call = RestRequest::collection_update(api_version, all_or_none, records)?;
            let results = self.send_collection(call).await?;
            correlate(chunk.iter().map(|(r, _, _)| r), results, Kind::Update, &mut responses);
        }

        for chunk in deletes.chunks(MAX_COLLECTION_RECORDS) {
            let ids: Vec<String> = chunk.iter().map(|(_, id)| id.clone()).collect();
            let call = RestRequest::collection_delete(api_version, all_or_none, &ids)?;
            let results = self.send_collection(call).await?;
            correlate(chunk.iter().map(|(r, _)| r), results, Kind::Delete, &mut responses);
        }

        Ok(responses)
    }

    async fn send_collection(&self, call: RestRequest) -> Result<Vec<CollectionResult>> {
        Ok(self.client.send_checked(call).await?.json()?)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Kind {
    Create,
    Upsert,
    Update,
    Delete,
}

/// Pair results with reference ids by position.
fn correlate<'r>(
    reference_ids: impl Iterator<Item = &'r String>,
    results: Vec<CollectionResult>,
    kind: Kind,
    responses: &mut HashMap<String, SubResponse>,
) {
    for (reference_id, result) in reference_ids.zip(results) {
        responses.insert(reference_id.clone(), synthesize(reference_id, kind, &result));
    }
}

/// Sub-response a single-record call would have produced.
fn synthesize(reference_id: &str, kind: Kind, result: &CollectionResult) -> SubResponse {
    if result.success {
        let status = match kind {
            Kind::Create => 201,
            Kind::Upsert if result.created.unwrap_or(false) => 201,
            Kind::Upsert | Kind::Update => 200,
            Kind::Delete => 204,
        };
        let body = match (kind, &result.id) {
            (Kind::Delete, _) | (_, None) => Value::Null,
            (_, Some(id)) => json!({
                "id": id,
                "success": true,
                "created": status == 201,
                "errors": []
            }),
        };
        return SubResponse::new(reference_id, status, body);
    }

    let gone = result.errors.first().is_some_and(|error| {
        error.fields.is_empty()
            && (error.status_code == ENTITY_IS_DELETED
                || error.status_code == INVALID_CROSS_REFERENCE_KEY)
    });
    let body = Value::Array(
        result
            .errors
            .iter()
            .map(|error| {
                json!({
                    "errorCode": error.status_code,
                    "message": error.message,
                    "fields": error.fields,
                })
            })
            .collect(),
    );
    SubResponse::new(reference_id, if gone { 404 } else { 400 }, body)
}
