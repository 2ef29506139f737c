//! Request builder
//!
//! Turns one dirty local record into the server request it needs, or into
//! nothing when no server call applies.
//!
//! | local state            | request                                    |
//! |------------------------|--------------------------------------------|
//! | clean                  | none                                       |
//! | created and deleted    | none                                       |
//! | deleted                | delete by id                               |
//! | created, external id   | upsert by external id                      |
//! | created                | create                                     |
//! | updated                | update by id                               |

use bridge_traits::store::Record;
use provider_rest::RestRequest;
use serde_json::{Map, Value};

use crate::error::{Result, SyncError};
use crate::fields::project_fields;
use crate::record::{is_local_id, SyncRecord};

/// Server request for one record
#[derive(Debug, Clone, PartialEq)]
pub enum RecordRequest {
    Create {
        object_type: String,
        fields: Map<String, Value>,
    },
    Upsert {
        object_type: String,
        external_id_field: String,
        external_id: String,
        fields: Map<String, Value>,
    },
    Update {
        object_type: String,
        id: String,
        fields: Map<String, Value>,
    },
    Delete {
        object_type: String,
        id: String,
    },
}

impl RecordRequest {
    pub fn object_type(&self) -> &str {
        match self {
            Self::Create { object_type, .. }
            | Self::Upsert { object_type, .. }
            | Self::Update { object_type, .. }
            | Self::Delete { object_type, .. } => object_type,
        }
    }

    /// `true` for requests that may bring a new server row into existence.
    pub fn is_create(&self) -> bool {
        matches!(self, Self::Create { .. } | Self::Upsert { .. })
    }

    pub fn is_delete(&self) -> bool {
        matches!(self, Self::Delete { .. })
    }

    /// Body fields, `None` for deletes.
    pub fn fields_mut(&mut self) -> Option<&mut Map<String, Value>> {
        match self {
            Self::Create { fields, .. }
            | Self::Upsert { fields, .. }
            | Self::Update { fields, .. } => Some(fields),
            Self::Delete { .. } => None,
        }
    }

    pub fn to_rest_request(&self, api_version: &str) -> RestRequest {
        match self {
            Self::Create {
                object_type,
                fields,
            } => RestRequest::create(api_version, object_type, fields.clone()),
            Self::Upsert {
                object_type,
                external_id_field,
                external_id,
                fields,
            } => RestRequest::upsert(
                api_version,
                object_type,
                external_id_field,
                external_id,
                fields.clone(),
            ),
            Self::Update {
                object_type,
                id,
                fields,
            } => RestRequest::update(api_version, object_type, id, fields.clone()),
            Self::Delete { object_type, id } => RestRequest::delete(api_version, object_type, id),
        }
    }
}

/// Field names and field-list overrides for one record type
#[derive(Debug, Clone, PartialEq)]
pub struct RequestBuilder {
    pub id_field: String,
    pub modification_date_field: String,
    pub external_id_field: Option<String>,
    pub create_fieldlist: Option<Vec<String>>,
    pub update_fieldlist: Option<Vec<String>>,
}

impl RequestBuilder {
    pub fn new(id_field: impl Into<String>, modification_date_field: impl Into<String>) -> Self {
        Self {
            id_field: id_field.into(),
            modification_date_field: modification_date_field.into(),
            external_id_field: None,
            create_fieldlist: None,
            update_fieldlist: None,
        }
    }

    pub fn with_external_id_field(mut self, field: Option<String>) -> Self {
        self.external_id_field = field;
        self
    }

    pub fn with_fieldlists(
        mut self,
        create_fieldlist: Option<Vec<String>>,
        update_fieldlist: Option<Vec<String>>,
    ) -> Self {
        self.create_fieldlist = create_fieldlist;
        self.update_fieldlist = update_fieldlist;
        self
    }

    /// Request for `record`, `None` when nothing has to be sent.
    ///
    /// The object type is taken from `attributes.type`, falling back to
    /// `default_type` unless it is empty.
    ///
    /// # Errors
    ///
    /// [`SyncError::MissingField`] when the object type is unknown or an
    /// update or delete has no id.
    pub fn build_request(
        &self,
        record: &Record,
        fieldlist: &[String],
        default_type: Option<&str>,
    ) -> Result<Option<RecordRequest>> {
        if !record.is_dirty() {
            return Ok(None);
        }
        let created = record.is_locally_created();
        let deleted = record.is_locally_deleted();
        if created && deleted {
            return Ok(None);
        }

        let object_type = record
            .object_type()
            .or(default_type.filter(|t| !t.is_empty()))
            .ok_or_else(|| SyncError::MissingField("attributes.type".to_string()))?
            .to_string();

        if deleted {
            return Ok(Some(RecordRequest::Delete {
                object_type,
                id: self.require_id(record)?,
            }));
        }

        if created {
            let list = self.create_fieldlist.as_deref().unwrap_or(fieldlist);
            let mut fields =
                project_fields(record, list, &self.id_field, &self.modification_date_field);

            if let Some((external_id_field, external_id)) = self.external_id(record) {
                fields.remove(&external_id_field);
                return Ok(Some(RecordRequest::Upsert {
                    object_type,
                    external_id_field,
                    external_id,
                    fields,
                }));
            }
            return Ok(Some(RecordRequest::Create {
                object_type,
                fields,
            }));
        }

        let list = self.update_fieldlist.as_deref().unwrap_or(fieldlist);
        Ok(Some(RecordRequest::Update {
            object_type,
            id: self.require_id(record)?,
            fields: project_fields(record, list, &self.id_field, &self.modification_date_field),
        }))
    }

    /// External id when configured and holding a real (non-placeholder) value.
    fn external_id(&self, record: &Record) -> Option<(String, String)> {
        let field = self.external_id_field.as_deref()?;
        let value = record.string_field(field)?;
        if is_local_id(value) {
            return None;
        }
        Some((field.to_string(), value.to_string()))
    }

    fn require_id(&self, record: &Record) -> Result<String> {
        record
            .string_field(&self.id_field)
            .map(str::to_string)
            .ok_or_else(|| SyncError::MissingField(self.id_field.clone()))
    }
}
