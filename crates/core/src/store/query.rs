//! Listing queries and their in-process evaluation.
//!
//! Local backends evaluate queries with [`Query::apply`]; the remote backend ships them
//! to the server as URL parameters.

use super::{Document, DocumentPage};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Order {
    #[default]
    CreatedDesc,
    CreatedAsc,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterOp {
    Eq,
    Ne,
    Lt,
    Gt,
    /// The field is an array containing the value.
    Contains,
}

impl FilterOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            FilterOp::Eq => "eq",
            FilterOp::Ne => "ne",
            FilterOp::Lt => "lt",
            FilterOp::Gt => "gt",
            FilterOp::Contains => "contains",
        }
    }

    pub fn parse(input: &str) -> Option<Self> {
        match input {
            "eq" => Some(FilterOp::Eq),
            "ne" => Some(FilterOp::Ne),
            "lt" => Some(FilterOp::Lt),
            "gt" => Some(FilterOp::Gt),
            "contains" => Some(FilterOp::Contains),
            _ => None,
        }
    }
}

/// A condition on one field of the document data. Dotted names address nested objects.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    pub field: String,
    pub op: FilterOp,
    pub value: Value,
}

/// Case-insensitive substring search across several string fields.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Search {
    pub fields: Vec<String>,
    pub term: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Query {
    pub filters: Vec<Filter>,
    pub search: Option<Search>,
    pub order: Order,
    /// `None` returns every match.
    pub limit: Option<usize>,
    pub offset: usize,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, field: &str, op: FilterOp, value: impl Into<Value>) -> Self {
        self.filters.push(Filter {
            field: field.to_string(),
            op,
            value: value.into(),
        });
        self
    }

    pub fn where_eq(self, field: &str, value: impl Into<Value>) -> Self {
        self.filter(field, FilterOp::Eq, value)
    }

    /// Adds a search unless `term` is blank.
    pub fn search(mut self, fields: &[&str], term: &str) -> Self {
        let term = term.trim();
        if !term.is_empty() {
            self.search = Some(Search {
                fields: fields.iter().map(|f| f.to_string()).collect(),
                term: term.to_string(),
            });
        }
        self
    }

    pub fn order(mut self, order: Order) -> Self {
        self.order = order;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    /// Whether a document satisfies every filter and the search term.
    pub fn matches(&self, document: &Document) -> bool {
        let filters_ok = self
            .filters
            .iter()
            .all(|filter| filter_matches(filter, &document.data));

        let search_ok = match &self.search {
            None => true,
            Some(search) => {
                let needle = search.term.to_lowercase();
                search.fields.iter().any(|field| {
                    lookup(&document.data, field)
                        .and_then(Value::as_str)
                        .map(|s| s.to_lowercase().contains(&needle))
                        .unwrap_or(false)
                })
            }
        };

        filters_ok && search_ok
    }

    /// Filters, orders and paginates a full collection scan.
    pub fn apply(&self, documents: impl IntoIterator<Item = Document>) -> DocumentPage {
        let mut matched: Vec<Document> = documents
            .into_iter()
            .filter(|doc| self.matches(doc))
            .collect();

        matched.sort_by(|a, b| {
            let ord = a
                .created_at
                .cmp(&b.created_at)
                .then_with(|| a.id.cmp(&b.id));
            match self.order {
                Order::CreatedAsc => ord,
                Order::CreatedDesc => ord.reverse(),
            }
        });

        let total = matched.len();
        let documents = matched
            .into_iter()
            .skip(self.offset)
            .take(self.limit.unwrap_or(usize::MAX))
            .collect();

        DocumentPage { total, documents }
    }
}

fn lookup<'a>(data: &'a Value, field: &str) -> Option<&'a Value> {
    field
        .split('.')
        .try_fold(data, |current, segment| current.get(segment))
}

fn filter_matches(filter: &Filter, data: &Value) -> bool {
    let actual = lookup(data, &filter.field);
    match filter.op {
        FilterOp::Eq => actual.unwrap_or(&Value::Null) == &filter.value,
        FilterOp::Ne => actual.unwrap_or(&Value::Null) != &filter.value,
        FilterOp::Lt => actual
            .and_then(|a| compare(a, &filter.value))
            .map(|o| o == Ordering::Less)
            .unwrap_or(false),
        FilterOp::Gt => actual
            .and_then(|a| compare(a, &filter.value))
            .map(|o| o == Ordering::Greater)
            .unwrap_or(false),
        FilterOp::Contains => actual
            .and_then(Value::as_array)
            .map(|items| items.contains(&filter.value))
            .unwrap_or(false),
    }
}

/// Numbers compare numerically, strings lexicographically; mixed types are incomparable.
fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hms_uuid::DocumentId;
    use serde_json::json;

    fn doc(data: Value) -> Document {
        Document::first_revision(DocumentId::new(), data)
    }

    #[test]
    fn eq_and_ne_filters() {
        let d = doc(json!({"status": "issued", "patient_id": "p1"}));

        assert!(Query::new().where_eq("status", "issued").matches(&d));
        assert!(!Query::new().where_eq("status", "paid").matches(&d));
        assert!(Query::new()
            .filter("status", FilterOp::Ne, "paid")
            .matches(&d));
        assert!(Query::new().where_eq("missing", Value::Null).matches(&d));
    }

    #[test]
    fn numeric_comparisons() {
        let d = doc(json!({"expires_at_unix": 100}));

        assert!(Query::new()
            .filter("expires_at_unix", FilterOp::Lt, 200)
            .matches(&d));
        assert!(!Query::new()
            .filter("expires_at_unix", FilterOp::Gt, 200)
            .matches(&d));
        assert!(!Query::new()
            .filter("expires_at_unix", FilterOp::Lt, "200")
            .matches(&d));
    }

    #[test]
    fn contains_checks_arrays() {
        let d = doc(json!({"role_ids": ["a", "b"]}));

        assert!(Query::new()
            .filter("role_ids", FilterOp::Contains, "b")
            .matches(&d));
        assert!(!Query::new()
            .filter("role_ids", FilterOp::Contains, "c")
            .matches(&d));
    }

    #[test]
    fn dotted_fields_reach_nested_values() {
        let d = doc(json!({"emergency_contact": {"phone": "0123"}}));
        assert!(Query::new()
            .where_eq("emergency_contact.phone", "0123")
            .matches(&d));
    }

    #[test]
    fn search_is_case_insensitive_across_fields() {
        let d = doc(json!({"first_name": "Ada", "last_name": "Lovelace"}));

        assert!(Query::new()
            .search(&["first_name", "last_name"], "LOVE")
            .matches(&d));
        assert!(!Query::new()
            .search(&["first_name"], "love")
            .matches(&d));
        assert!(Query::new().search(&["first_name"], "   ").matches(&d));
    }

    #[test]
    fn apply_counts_total_before_pagination() {
        let docs: Vec<Document> = (0..5).map(|i| doc(json!({"n": i}))).collect();

        let page = Query::new()
            .order(Order::CreatedAsc)
            .offset(1)
            .limit(2)
            .apply(docs.clone());

        assert_eq!(page.total, 5);
        assert_eq!(page.documents.len(), 2);

        let mut sorted = docs;
        sorted.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        assert_eq!(page.documents[0].id, sorted[1].id);
        assert_eq!(page.documents[1].id, sorted[2].id);
    }
}
