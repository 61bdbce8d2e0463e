//! Match-event payload decoding
//!
//! Different host engine versions report the matched directive id under
//! different fields. The known shapes are tried in a fixed order.

use serde_json::Value;

/// Places a matched directive id may appear in a match-event payload,
/// depending on the engine version that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchIdField {
    /// `{ "rule": { "ruleId": n } }`
    RuleRuleId,
    /// `{ "ruleId": n }`
    RuleId,
    /// `{ "rule": { "id": n } }`
    RuleNestedId,
    /// `{ "matchedRule": { "ruleId": n } }`
    MatchedRuleRuleId,
    /// `{ "id": n }`
    Id,
}

/// Extraction order; the first field holding a valid id wins.
pub const MATCH_ID_FIELDS: [MatchIdField; 5] = [
    MatchIdField::RuleRuleId,
    MatchIdField::RuleId,
    MatchIdField::RuleNestedId,
    MatchIdField::MatchedRuleRuleId,
    MatchIdField::Id,
];

impl MatchIdField {
    fn path(self) -> &'static [&'static str] {
        match self {
            Self::RuleRuleId => &["rule", "ruleId"],
            Self::RuleId => &["ruleId"],
            Self::RuleNestedId => &["rule", "id"],
            Self::MatchedRuleRuleId => &["matchedRule", "ruleId"],
            Self::Id => &["id"],
        }
    }

    pub fn extract(self, details: &Value) -> Option<u32> {
        let value = self
            .path()
            .iter()
            .try_fold(details, |node, key| node.get(key))?;
        positive_id(value)
    }
}

fn positive_id(value: &Value) -> Option<u32> {
    if let Some(n) = value.as_u64() {
        return u32::try_from(n).ok().filter(|&n| n > 0);
    }
    let f = value.as_f64()?;
    if f.fract() == 0.0 && f >= 1.0 && f <= u32::MAX as f64 {
        Some(f as u32)
    } else {
        None
    }
}

/// Pull the matched directive id out of a match-event payload.
pub fn extract_matched_id(details: &Value) -> Option<u32> {
    MATCH_ID_FIELDS.iter().find_map(|field| field.extract(details))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn extracts_from_each_shape() {
        assert_eq!(extract_matched_id(&json!({ "rule": { "ruleId": 7 } })), Some(7));
        assert_eq!(extract_matched_id(&json!({ "ruleId": 8 })), Some(8));
        assert_eq!(extract_matched_id(&json!({ "rule": { "id": 9 } })), Some(9));
        assert_eq!(extract_matched_id(&json!({ "matchedRule": { "ruleId": 10 } })), Some(10));
        assert_eq!(extract_matched_id(&json!({ "id": 11 })), Some(11));
        assert_eq!(extract_matched_id(&json!({ "rule": { "ruleId": 12.0 } })), Some(12));
    }

    #[test]
    fn first_valid_shape_wins() {
        let details = json!({ "rule": { "ruleId": -1, "id": 4 }, "ruleId": "5" });
        assert_eq!(extract_matched_id(&details), Some(4));

        let details = json!({ "rule": { "ruleId": 3 }, "ruleId": 5 });
        assert_eq!(extract_matched_id(&details), Some(3));
    }

    #[test]
    fn rejects_non_positive_and_non_integers() {
        for details in [
            json!({}),
            json!(null),
            json!({ "ruleId": 0 }),
            json!({ "ruleId": -3 }),
            json!({ "ruleId": 1.5 }),
            json!({ "ruleId": "12" }),
            json!({ "ruleId": 5_000_000_000u64 }),
            json!({ "rule": 12 }),
        ] {
            assert_eq!(extract_matched_id(&details), None, "{details}");
        }
    }
}
