use serde_json::{Map, Value};

/// A platform-sourced identity record as it crosses the lookup boundary.
pub type CandidateRecord = Map<String, Value>;

/// Keep only the fields of `record` named in `allowed_fields`, in allow-list order.
#[must_use]
pub fn filter_fields<S>(record: &CandidateRecord, allowed_fields: &[S]) -> CandidateRecord
where
    S: AsRef<str>,
{
    let mut filtered = CandidateRecord::new();
    for field in allowed_fields {
        let field = field.as_ref();
        if let Some(value) = record.get(field) {
            filtered.insert(field.to_string(), value.clone());
        }
    }
    filtered
}
