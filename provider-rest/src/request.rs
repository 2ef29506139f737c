//! REST request constructors
//!
//! A [`RestRequest`] is a method, a path under the instance URL and an
//! optional JSON body. Paths always start at `/services/data/{version}` so the
//! same value can be sent directly or nested inside a composite call.

use bridge_traits::http::HttpMethod;
use serde_json::{Map, Value};

use crate::error::{RestError, Result};
use crate::types::{
    CollectionRequestBody, CollectionRetrieveBody, CompositeRequestBody, CompositeSubrequest,
};

/// Largest number of subrequests accepted by one composite call
pub const MAX_COMPOSITE_SUBREQUESTS: usize = 25;

/// Largest number of records accepted by one collection call
pub const MAX_COLLECTION_RECORDS: usize = 200;

#[derive(Debug, Clone, PartialEq)]
pub struct RestRequest {
    pub method: HttpMethod,
    pub path: String,
    pub body: Option<Value>,
}

fn base_path(api_version: &str) -> String {
    format!("/services/data/{}", api_version)
}

fn sobject_path(api_version: &str, object_type: &str) -> String {
    format!("{}/sobjects/{}", base_path(api_version), object_type)
}

fn collection_path(api_version: &str) -> String {
    format!("{}/composite/sobjects", base_path(api_version))
}

fn encode_segment(segment: &str) -> String {
    urlencoding::encode(segment).into_owned()
}

fn with_type_attribute(object_type: &str, mut fields: Map<String, Value>) -> Value {
    let mut attributes = Map::new();
    attributes.insert("type".to_string(), Value::from(object_type));
    fields.insert("attributes".to_string(), Value::Object(attributes));
    Value::Object(fields)
}

impl RestRequest {
    pub fn new(method: HttpMethod, path: impl Into<String>, body: Option<Value>) -> Self {
        Self {
            method,
            path: path.into(),
            body,
        }
    }

    /// `POST /sobjects/{type}`
    pub fn create(api_version: &str, object_type: &str, fields: Map<String, Value>) -> Self {
        Self::new(
            HttpMethod::Post,
            sobject_path(api_version, object_type),
            Some(Value::Object(fields)),
        )
    }

    /// `GET /sobjects/{type}/{id}?fields=...`
    pub fn retrieve(api_version: &str, object_type: &str, id: &str, fields: &[String]) -> Self {
        let mut path = format!(
            "{}/{}",
            sobject_path(api_version, object_type),
            encode_segment(id)
        );
        if !fields.is_empty() {
            path.push_str("?fields=");
            path.push_str(&encode_segment(&fields.join(",")));
        }
        Self::new(HttpMethod::Get, path, None)
    }

    /// `PATCH /sobjects/{type}/{id}`
    pub fn update(
        api_version: &str,
        object_type: &str,
        id: &str,
        fields: Map<String, Value>,
    ) -> Self {
        Self::new(
            HttpMethod::Patch,
            format!(
                "{}/{}",
                sobject_path(api_version, object_type),
                encode_segment(id)
            ),
            Some(Value::Object(fields)),
        )
    }

    /// `PATCH /sobjects/{type}/{externalIdField}/{externalId}`
    pub fn upsert(
        api_version: &str,
        object_type: &str,
        external_id_field: &str,
        external_id: &str,
        fields: Map<String, Value>,
    ) -> Self {
        Self::new(
            HttpMethod::Patch,
            format!(
                "{}/{}/{}",
                sobject_path(api_version, object_type),
                external_id_field,
                encode_segment(external_id)
            ),
            Some(Value::Object(fields)),
        )
    }

    /// `DELETE /sobjects/{type}/{id}`
    pub fn delete(api_version: &str, object_type: &str, id: &str) -> Self {
        Self::new(
            HttpMethod::Delete,
            format!(
                "{}/{}",
                sobject_path(api_version, object_type),
                encode_segment(id)
            ),
            None,
        )
    }

    /// `POST /composite`, subrequests kept in the given order.
    pub fn composite(
        api_version: &str,
        all_or_none: bool,
        subrequests: &[(String, RestRequest)],
    ) -> Result<Self> {
        if subrequests.len() > MAX_COMPOSITE_SUBREQUESTS {
            return Err(RestError::InvalidRequest(format!(
                "composite call holds {} subrequests, limit is {}",
                subrequests.len(),
                MAX_COMPOSITE_SUBREQUESTS
            )));
        }

        let body = CompositeRequestBody {
            all_or_none,
            composite_request: subrequests
                .iter()
                .map(|(reference_id, request)| CompositeSubrequest {
                    method: request.method.as_str().to_string(),
                    url: request.path.clone(),
                    reference_id: reference_id.clone(),
                    body: request.body.clone(),
                })
                .collect(),
        };

        Ok(Self::new(
            HttpMethod::Post,
            format!("{}/composite", base_path(api_version)),
            Some(serde_json::to_value(body)?),
        ))
    }

    /// `POST /composite/sobjects`
    pub fn collection_create(
        api_version: &str,
        all_or_none: bool,
        records: Vec<(String, Map<String, Value>)>,
    ) -> Result<Self> {
        Self::collection_write(HttpMethod::Post, collection_path(api_version), all_or_none, records)
    }

    /// `PATCH /composite/sobjects`; every record must carry its `Id`.
    pub fn collection_update(
        api_version: &str,
        all_or_none: bool,
        records: Vec<(String, Map<String, Value>)>,
    ) -> Result<Self> {
        Self::collection_write(HttpMethod::Patch, collection_path(api_version), all_or_none, records)
    }

    /// `PATCH /composite/sobjects/{type}/{externalIdField}`
    pub fn collection_upsert(
        api_version: &str,
        all_or_none: bool,
        object_type: &str,
        external_id_field: &str,
        records: Vec<Map<String, Value>>,
    ) -> Result<Self> {
        let typed = records
            .into_iter()
            .map(|fields| (object_type.to_string(), fields))
            .collect();
        Self::collection_write(
            HttpMethod::Patch,
            format!(
                "{}/{}/{}",
                collection_path(api_version),
                object_type,
                external_id_field
            ),
            all_or_none,
            typed,
        )
    }

    /// `DELETE /composite/sobjects?ids=...&allOrNone=...`
    pub fn collection_delete(api_version: &str, all_or_none: bool, ids: &[String]) -> Result<Self> {
        Self::check_collection_size(ids.len())?;
        Ok(Self::new(
            HttpMethod::Delete,
            format!(
                "{}?ids={}&allOrNone={}",
                collection_path(api_version),
                encode_segment(&ids.join(",")),
                all_or_none
            ),
            None,
        ))
    }

    /// `POST /composite/sobjects/{type}` with `{ids, fields}`
    pub fn collection_retrieve(
        api_version: &str,
        object_type: &str,
        ids: &[String],
        fields: &[String],
    ) -> Result<Self> {
        Self::check_collection_size(ids.len())?;
        let body = CollectionRetrieveBody {
            ids: ids.to_vec(),
            fields: fields.to_vec(),
        };
        Ok(Self::new(
            HttpMethod::Post,
            format!("{}/{}", collection_path(api_version), object_type),
            Some(serde_json::to_value(body)?),
        ))
    }

    /// `GET /query?q=...`
    pub fn query(api_version: &str, soql: &str) -> Self {
        Self::new(
            HttpMethod::Get,
            format!("{}/query?q={}", base_path(api_version), urlencoding::encode(soql)),
            None,
        )
    }

    fn check_collection_size(len: usize) -> Result<()> {
        if len > MAX_COLLECTION_RECORDS {
            return Err(RestError::InvalidRequest(format!(
                "collection call holds {} records, limit is {}",
                len, MAX_COLLECTION_RECORDS
            )));
        }
        Ok(())
    }

    fn collection_write(
        method: HttpMethod,
        path: String,
        all_or_none: bool,
        records: Vec<(String, Map<String, Value>)>,
    ) -> Result<Self> {
        Self::check_collection_size(records.len())?;
        let body = CollectionRequestBody {
            all_or_none,
            records: records
                .into_iter()
                .map(|(object_type, fields)| with_type_attribute(&object_type, fields))
                .collect(),
        };
        Ok(Self::new(method, path, Some(serde_json::to_value(body)?)))
    }
}
