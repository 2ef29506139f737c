//! REST API wire types
//!
//! Request and response payloads for the composite, sObject Collections and
//! query resources.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

// ============================================================================
// Composite
// ============================================================================

/// One entry of a composite request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompositeSubrequest {
    pub method: String,
    /// Path starting at `/services/data/...`
    pub url: String,
    pub reference_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
}

/// Body of `POST /composite`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompositeRequestBody {
    pub all_or_none: bool,
    pub composite_request: Vec<CompositeSubrequest>,
}

/// One entry of a composite response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompositeSubresponse {
    #[serde(default)]
    pub body: Value,
    #[serde(default)]
    pub http_headers: HashMap<String, String>,
    pub http_status_code: i32,
    pub reference_id: String,
}

/// Body returned by `POST /composite`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompositeResponse {
    pub composite_response: Vec<CompositeSubresponse>,
}

// ============================================================================
// sObject Collections
// ============================================================================

/// Body of collection create / update / upsert calls
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionRequestBody {
    pub all_or_none: bool,
    /// Each record carries `attributes.type`
    pub records: Vec<Value>,
}

/// Body of the collection retrieve call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionRetrieveBody {
    pub ids: Vec<String>,
    pub fields: Vec<String>,
}

/// Per-record error inside a collection result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionError {
    pub status_code: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub fields: Vec<String>,
}

/// Per-record result of collection create / update / upsert / delete
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionResult {
    #[serde(default)]
    pub id: Option<String>,
    pub success: bool,
    /// Present on upsert: `true` when the call inserted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<bool>,
    #[serde(default)]
    pub errors: Vec<CollectionError>,
}

// ============================================================================
// Query
// ============================================================================

/// Body returned by `GET /query`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResponse {
    pub total_size: u64,
    pub done: bool,
    #[serde(default)]
    pub records: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_records_url: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_composite_subrequest_omits_missing_body() {
        let sub = CompositeSubrequest {
            method: "DELETE".to_string(),
            url: "/services/data/v60.0/sobjects/Account/001".to_string(),
            reference_id: "001".to_string(),
            body: None,
        };

        let value = serde_json::to_value(&sub).unwrap();
        assert_eq!(value["referenceId"], "001");
        assert!(value.get("body").is_none());
    }

    #[test]
    fn test_parse_composite_response() {
        let raw = json!({
            "compositeResponse": [
                {
                    "body": {"id": "001NEW", "success": true, "errors": []},
                    "httpHeaders": {"Location": "/services/data/v60.0/sobjects/Account/001NEW"},
                    "httpStatusCode": 201,
                    "referenceId": "local_1"
                },
                {
                    "body": null,
                    "httpHeaders": {},
                    "httpStatusCode": 204,
                    "referenceId": "001OLD"
                }
            ]
        });

        let parsed: CompositeResponse = serde_json::from_value(raw).unwrap();
        assert_eq!(parsed.composite_response.len(), 2);
        assert_eq!(parsed.composite_response[0].http_status_code, 201);
        assert_eq!(parsed.composite_response[0].body["id"], "001NEW");
        assert!(parsed.composite_response[1].body.is_null());
    }

    #[test]
    fn test_parse_collection_results() {
        let raw = json!([
            {"id": "001A", "success": true, "created": true, "errors": []},
            {"id": null, "success": false, "errors": [
                {"statusCode": "ENTITY_IS_DELETED", "message": "entity is deleted", "fields": []}
            ]}
        ]);

        let parsed: Vec<CollectionResult> = serde_json::from_value(raw).unwrap();
        assert_eq!(parsed[0].created, Some(true));
        assert!(!parsed[1].success);
        assert_eq!(parsed[1].errors[0].status_code, "ENTITY_IS_DELETED");
    }

    #[test]
    fn test_parse_query_response() {
        let raw = json!({
            "totalSize": 1,
            "done": true,
            "records": [{"attributes": {"type": "Account"}, "Id": "001", "LastModifiedDate": "2024-01-01T00:00:00.000+0000"}]
        });

        let parsed: QueryResponse = serde_json::from_value(raw).unwrap();
        assert!(parsed.done);
        assert_eq!(parsed.records[0]["Id"], "001");
        assert!(parsed.next_records_url.is_none());
    }
}
