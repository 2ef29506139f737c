//! Shared doubles for the sync-up integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use bridge_desktop::MemoryRecordStore;
use bridge_traits::error::Result as BridgeResult;
use bridge_traits::http::{HttpClient, HttpMethod, HttpRequest, HttpResponse};
use bridge_traits::store::{LocalStore, Record};
use bytes::Bytes;
use core_sync::SyncContext;
use provider_rest::RestClient;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

pub const API: &str = "/services/data/v60.0";

/// One request seen by [`FakeServer`]
#[derive(Debug, Clone)]
pub struct LoggedRequest {
    pub method: HttpMethod,
    pub url: String,
    pub body: Value,
}

impl LoggedRequest {
    pub fn is_composite(&self) -> bool {
        self.method == HttpMethod::Post && self.url.ends_with("/composite")
    }

    /// `(method, url, referenceId)` of every subrequest of a composite call
    pub fn subrequests(&self) -> Vec<(String, String, String)> {
        self.body["compositeRequest"]
            .as_array()
            .map(|subs| {
                subs.iter()
                    .map(|sub| {
                        (
                            sub["method"].as_str().unwrap_or_default().to_string(),
                            sub["url"].as_str().unwrap_or_default().to_string(),
                            sub["referenceId"].as_str().unwrap_or_default().to_string(),
                        )
                    })
                    .collect()
            })
            .unwrap_or_default()
    }
}

type Handler = Box<dyn Fn(&LoggedRequest) -> (u16, Value) + Send + Sync>;

/// Scripted REST server recording every request it receives
pub struct FakeServer {
    log: Mutex<Vec<LoggedRequest>>,
    handler: Handler,
}

impl FakeServer {
    pub fn new(handler: impl Fn(&LoggedRequest) -> (u16, Value) + Send + Sync + 'static) -> Arc<Self> {
        Arc::new(Self {
            log: Mutex::new(Vec::new()),
            handler: Box::new(handler),
        })
    }

    /// Answers composite calls subrequest by subrequest with
    /// `answer(method, url, body) -> (status, body)`.
    pub fn composite(
        answer: impl Fn(&str, &str, &Value) -> (i32, Value) + Send + Sync + 'static,
    ) -> Arc<Self> {
        Self::new(move |request| {
            if !request.is_composite() {
                return (404, json!([{"errorCode": "NOT_FOUND"}]));
            }
            (200, answer_composite(&request.body, &answer))
        })
    }

    pub fn requests(&self) -> Vec<LoggedRequest> {
        self.log.lock().unwrap().clone()
    }

    pub fn composite_calls(&self) -> Vec<LoggedRequest> {
        self.requests()
            .into_iter()
            .filter(LoggedRequest::is_composite)
            .collect()
    }
}

pub fn answer_composite(body: &Value, answer: &dyn Fn(&str, &str, &Value) -> (i32, Value)) -> Value {
    let responses: Vec<Value> = body["compositeRequest"]
        .as_array()
        .cloned()
        .unwrap_or_default()
        .iter()
        .map(|sub| {
            let (status, body) = answer(
                sub["method"].as_str().unwrap_or_default(),
                sub["url"].as_str().unwrap_or_default(),
                &sub["body"],
            );
            json!({
                "body": body,
                "httpHeaders": {},
                "httpStatusCode": status,
                "referenceId": sub["referenceId"],
            })
        })
        .collect();
    json!({ "compositeResponse": responses })
}

#[async_trait]
impl HttpClient for FakeServer {
    async fn execute(&self, request: HttpRequest) -> BridgeResult<HttpResponse> {
        let body = request
            .body
            .as_ref()
            .and_then(|b| serde_json::from_slice(b).ok())
            .unwrap_or(Value::Null);
        let logged = LoggedRequest {
            method: request.method,
            url: request.url.clone(),
            body,
        };
        let (status, body) = (self.handler)(&logged);
        self.log.lock().unwrap().push(logged);

        Ok(HttpResponse {
            status,
            headers: HashMap::new(),
            body: if body.is_null() {
                Bytes::new()
            } else {
                Bytes::from(body.to_string())
            },
        })
    }
}

pub fn record(value: Value) -> Record {
    value.as_object().cloned().unwrap()
}

pub async fn seed(store: &MemoryRecordStore, soup: &str, value: Value) -> Record {
    store.upsert(soup, record(value)).await.unwrap()
}

pub fn entry_id(record: &Record) -> i64 {
    record["_soupEntryId"].as_i64().unwrap()
}

pub fn context(server: Arc<FakeServer>, store: Arc<MemoryRecordStore>, soup: &str) -> SyncContext {
    let client = RestClient::new(server, "https://test.example.com", "v60.0", "token");
    SyncContext::new(client, store, soup)
}

pub fn fieldlist(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}
