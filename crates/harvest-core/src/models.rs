use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A numeric identifier of one unit of scrape work (an MC/MX docket number).
pub type WorkItem = u64;

/// Field name → value, as produced by an [`Extractor`](crate::traits::Extractor).
pub type FieldMap = BTreeMap<String, String>;

/// Field holding the subject's operating authority status.
pub const AUTHORITY_STATUS_FIELD: &str = "Operating Authority Status";

/// Marker in the status field that disqualifies a record.
pub const NOT_AUTHORIZED_MARKER: &str = "NOT AUTHORIZED";

/// Marker in the status field that flags a record for highlighting.
pub const OUT_OF_SERVICE_MARKER: &str = "OUT-OF-SERVICE";

/// One successfully processed work item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    pub id: WorkItem,
    pub fields: FieldMap,
    /// Status contains [`NOT_AUTHORIZED_MARKER`]. Dropped unless the job includes them.
    pub not_authorized: bool,
    /// Status contains [`OUT_OF_SERVICE_MARKER`]. Never dropped.
    pub out_of_service: bool,
}

impl Record {
    /// Build a record from extracted fields, deriving both classification flags.
    pub fn classify(id: WorkItem, fields: FieldMap) -> Self {
        let status = fields
            .get(AUTHORITY_STATUS_FIELD)
            .map(String::as_str)
            .unwrap_or_default();

        Self {
            id,
            not_authorized: status.contains(NOT_AUTHORIZED_MARKER),
            out_of_service: status.contains(OUT_OF_SERVICE_MARKER),
            fields,
        }
    }

    /// Whether the record belongs in the job output.
    pub fn is_kept(&self, include_not_authorized: bool) -> bool {
        !self.not_authorized || include_not_authorized
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        self.fields.get(field).map(String::as_str)
    }
}
