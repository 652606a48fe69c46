//! Payloads exchanged with the document store, parser and field extractor.

use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Location of an uploaded document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UploadReceipt {
    pub store_id: String,
    pub drive_id: String,
    pub item_id: String,
    pub url: String,
}

/// Structured answer of the text-to-fields extractor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompanyFields {
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default)]
    pub bank_name: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
}

/// Enriched result set returned by the parsing service.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParseResults {
    pub transactions_enriched: Vec<Transaction>,
}

impl ParseResults {
    /// Read a transactions reply. Only the presence of the
    /// `transactions_enriched` array decides success; entries with unexpected
    /// field types are kept with those fields empty.
    pub fn from_reply(reply: &Value) -> Option<Self> {
        let items = reply.get("transactions_enriched")?.as_array()?;
        let transactions_enriched = items
            .iter()
            .map(|item| Transaction::deserialize(item).unwrap_or_default())
            .collect();
        Some(Self { transactions_enriched })
    }

    pub fn transaction_count(&self) -> usize {
        self.transactions_enriched.len()
    }
}

/// One enriched transaction. Every field is optional; providers differ.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    #[serde(default, deserialize_with = "lenient_text")]
    pub id: Option<String>,
    /// Booking date as sent by the provider.
    #[serde(default, deserialize_with = "lenient_text")]
    pub date: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub description: Option<String>,
    #[serde(default, deserialize_with = "lenient_amount")]
    pub amount: Option<Decimal>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub category: Option<String>,
}

/// Strings as-is, numbers and booleans in their JSON form, anything else empty.
fn lenient_text<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) => Some(s),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    })
}

fn lenient_amount<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Decimal>, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) => Decimal::from_str(s.trim()).ok(),
        Value::Number(n) => Decimal::from_str(&n.to_string())
            .or_else(|_| Decimal::from_scientific(&n.to_string()))
            .ok(),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_numeric_ids_and_amounts_are_accepted() {
        let reply = json!({"transactions_enriched": [
            {"id": 17, "amount": -3.5, "description": "Coffee"},
            {"id": "t2", "amount": "1200.00", "category": null},
            "not an object"
        ]});
        let results = ParseResults::from_reply(&reply).unwrap();

        assert_eq!(results.transaction_count(), 3);
        let first = &results.transactions_enriched[0];
        assert_eq!(first.id.as_deref(), Some("17"));
        assert_eq!(first.amount, Some(Decimal::new(-35, 1)));
        assert_eq!(results.transactions_enriched[1].amount, Some(Decimal::new(120000, 2)));
        assert_eq!(results.transactions_enriched[2], Transaction::default());
    }

    #[test]
    fn test_missing_or_null_list_is_not_a_result() {
        assert_eq!(ParseResults::from_reply(&json!({"error": "pending"})), None);
        assert_eq!(ParseResults::from_reply(&json!({"transactions_enriched": null})), None);
        assert_eq!(ParseResults::from_reply(&json!({"transactions_enriched": "bad"})), None);
        assert_eq!(
            ParseResults::from_reply(&json!({"transactions_enriched": []})).map(|r| r.transaction_count()),
            Some(0)
        );
    }
}
