//! Continuation token codecs.
//!
//! A search has two logically separate result streams, each with its own
//! opaque resume token: the match stream and the includes stream. Both
//! codecs fail closed: a token that does not parse, or parses to an
//! unaccepted shape, decodes to "no token" and the caller restarts from
//! the beginning. Tokens may have been issued before a schema change, so
//! a malformed token is never a request-rejecting error.

use serde_json::{Value, json};
use tracing::debug;

use ferrofhir_core::{PrimaryKeyRange, ResourceTypeId, SurrogateId};

/// Resume state for the match stream.
///
/// The simple form is a bare surrogate id. A search spanning several
/// resource types resumes from a composite: the last row's primary key
/// plus the bitset of type ids still to be scanned.
#[derive(Debug, Clone, PartialEq)]
pub enum ContinuationToken {
    Simple(SurrogateId),
    Composite(PrimaryKeyRange),
}

impl ContinuationToken {
    /// Serialize to the compact textual form.
    pub fn encode(&self) -> String {
        match self {
            Self::Simple(sid) => sid.to_string(),
            Self::Composite(range) => {
                let ids: Vec<i16> = range.next_type_ids.iter().map(|id| id.0).collect();
                json!({
                    "current": {
                        "resourceTypeId": range.current.resource_type_id.0,
                        "resourceSurrogateId": range.current.resource_surrogate_id.as_i64(),
                    },
                    "nextTypeIds": ids,
                })
                .to_string()
            }
        }
    }

    /// Parse the textual form; malformed input decodes to `None`.
    pub fn decode(text: &str) -> Option<Self> {
        if let Ok(raw) = text.trim().parse::<i64>() {
            return match SurrogateId::new(raw) {
                Ok(sid) => Some(Self::Simple(sid)),
                Err(_) => {
                    debug!(token = text, "Discarding malformed match continuation token");
                    None
                }
            };
        }
        match serde_json::from_str::<PrimaryKeyRange>(text) {
            Ok(range) if range.current.resource_surrogate_id.as_i64() >= 0 => {
                Some(Self::Composite(range))
            }
            _ => {
                debug!(token = text, "Discarding malformed match continuation token");
                None
            }
        }
    }
}

/// Resume state for the includes stream.
///
/// Serialized as a flat JSON array. Fields 1-3 bound the match rows the
/// includes belong to and are always present; the include resume point
/// (fields 4-5) is present as a pair or not at all; the sort-phase flag
/// (field 6) and the nested second-phase token (field 7, embedded as a
/// stringified element to keep the outer array flat) are trailing
/// extensions. Accepted array lengths are 3, 5, 6, and 7.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct IncludesContinuationToken {
    pub match_resource_type_id: ResourceTypeId,
    pub match_resource_surrogate_id_min: SurrogateId,
    pub match_resource_surrogate_id_max: SurrogateId,
    pub include_resource_type_id: Option<ResourceTypeId>,
    pub include_resource_surrogate_id: Option<SurrogateId>,
    pub sort_query_second_phase: Option<bool>,
    pub second_phase: Option<Box<IncludesContinuationToken>>,
}

impl IncludesContinuationToken {
    /// Create a token bounding a window of match rows.
    pub fn new(
        match_resource_type_id: ResourceTypeId,
        match_resource_surrogate_id_min: SurrogateId,
        match_resource_surrogate_id_max: SurrogateId,
    ) -> Self {
        Self {
            match_resource_type_id,
            match_resource_surrogate_id_min,
            match_resource_surrogate_id_max,
            ..Self::default()
        }
    }

    /// Set the resume point within the includes stream.
    #[must_use]
    pub fn with_include_position(mut self, type_id: ResourceTypeId, sid: SurrogateId) -> Self {
        self.include_resource_type_id = Some(type_id);
        self.include_resource_surrogate_id = Some(sid);
        self
    }

    /// Record which sort phase the owning search was executing.
    #[must_use]
    pub fn with_sort_phase(mut self, second_phase: bool) -> Self {
        self.sort_query_second_phase = Some(second_phase);
        self
    }

    /// Attach the second-phase token; requires the sort-phase flag.
    #[must_use]
    pub fn with_second_phase(mut self, token: IncludesContinuationToken) -> Self {
        if self.sort_query_second_phase.is_none() {
            self.sort_query_second_phase = Some(false);
        }
        self.second_phase = Some(Box::new(token));
        self
    }

    /// Serialize to the flat array form.
    pub fn encode(&self) -> String {
        let mut fields = vec![
            json!(self.match_resource_type_id.0),
            json!(self.match_resource_surrogate_id_min.as_i64()),
            json!(self.match_resource_surrogate_id_max.as_i64()),
        ];

        let has_position = self.include_resource_type_id.is_some();
        let has_phase = self.sort_query_second_phase.is_some();
        if has_position || has_phase {
            fields.push(match self.include_resource_type_id {
                Some(id) => json!(id.0),
                None => Value::Null,
            });
            fields.push(match self.include_resource_surrogate_id {
                Some(sid) => json!(sid.as_i64()),
                None => Value::Null,
            });
        }
        if let Some(second_phase) = self.sort_query_second_phase {
            fields.push(json!(second_phase));
        }
        if let Some(nested) = &self.second_phase {
            fields.push(json!(nested.encode()));
        }

        Value::Array(fields).to_string()
    }

    /// Parse the flat array form; any unaccepted shape decodes to `None`.
    pub fn decode(text: &str) -> Option<Self> {
        let result = Self::parse(text);
        if result.is_none() {
            debug!(token = text, "Discarding malformed includes continuation token");
        }
        result
    }

    fn parse(text: &str) -> Option<Self> {
        let value: Value = serde_json::from_str(text).ok()?;
        let fields = value.as_array()?;
        if !matches!(fields.len(), 3 | 5 | 6 | 7) {
            return None;
        }

        let match_resource_type_id = type_id(&fields[0])?;
        let match_resource_surrogate_id_min = surrogate_id(&fields[1])?;
        let match_resource_surrogate_id_max = surrogate_id(&fields[2])?;

        let (include_resource_type_id, include_resource_surrogate_id) = if fields.len() >= 5 {
            match (nullable(&fields[3])?, nullable(&fields[4])?) {
                (Some(t), Some(s)) => (Some(type_id(t)?), Some(surrogate_id(s)?)),
                (None, None) => (None, None),
                // field 5 is present iff field 4 is
                _ => return None,
            }
        } else {
            (None, None)
        };

        let sort_query_second_phase = if fields.len() >= 6 {
            Some(fields[5].as_bool()?)
        } else {
            None
        };

        let second_phase = if fields.len() == 7 {
            Some(Box::new(Self::parse(fields[6].as_str()?)?))
        } else {
            None
        };

        Some(Self {
            match_resource_type_id,
            match_resource_surrogate_id_min,
            match_resource_surrogate_id_max,
            include_resource_type_id,
            include_resource_surrogate_id,
            sort_query_second_phase,
            second_phase,
        })
    }
}

fn nullable(value: &Value) -> Option<Option<&Value>> {
    if value.is_null() {
        Some(None)
    } else {
        Some(Some(value))
    }
}

fn type_id(value: &Value) -> Option<ResourceTypeId> {
    i16::try_from(value.as_i64()?).ok().map(ResourceTypeId)
}

fn surrogate_id(value: &Value) -> Option<SurrogateId> {
    SurrogateId::new(value.as_i64()?).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferrofhir_core::{PrimaryKey, TypeIdBitset};

    fn sid(raw: i64) -> SurrogateId {
        SurrogateId::new(raw).unwrap()
    }

    #[test]
    fn test_match_token_simple_round_trip() {
        let token = ContinuationToken::Simple(sid(1234567));
        let decoded = ContinuationToken::decode(&token.encode()).unwrap();
        assert_eq!(decoded, token);
    }

    #[test]
    fn test_match_token_composite_round_trip() {
        let range = PrimaryKeyRange::new(
            PrimaryKey::new(ResourceTypeId(5), sid(100)),
            TypeIdBitset::from_ids([ResourceTypeId(7), ResourceTypeId(9)]),
        );
        let token = ContinuationToken::Composite(range);
        let decoded = ContinuationToken::decode(&token.encode()).unwrap();
        assert_eq!(decoded, token);
    }

    #[test]
    fn test_match_token_malformed_decodes_to_none() {
        assert!(ContinuationToken::decode("not-a-token").is_none());
        assert!(ContinuationToken::decode("-5").is_none());
        assert!(ContinuationToken::decode("{\"current\": 3}").is_none());
    }

    #[test]
    fn test_includes_token_three_field_round_trip() {
        let token = IncludesContinuationToken::new(ResourceTypeId(5), sid(100), sid(250));
        let text = token.encode();
        assert_eq!(text, "[5,100,250]");
        assert_eq!(IncludesContinuationToken::decode(&text).unwrap(), token);
    }

    #[test]
    fn test_includes_token_five_field_round_trip() {
        let token = IncludesContinuationToken::new(ResourceTypeId(5), sid(100), sid(250))
            .with_include_position(ResourceTypeId(2), sid(777));
        let decoded = IncludesContinuationToken::decode(&token.encode()).unwrap();
        assert_eq!(decoded, token);
        assert_eq!(decoded.include_resource_type_id, Some(ResourceTypeId(2)));
    }

    #[test]
    fn test_includes_token_six_field_round_trip_with_null_position() {
        let token =
            IncludesContinuationToken::new(ResourceTypeId(5), sid(100), sid(250)).with_sort_phase(false);
        let text = token.encode();
        assert_eq!(text, "[5,100,250,null,null,false]");

        let decoded = IncludesContinuationToken::decode(&text).unwrap();
        assert_eq!(decoded.match_resource_type_id, ResourceTypeId(5));
        assert_eq!(decoded.match_resource_surrogate_id_min, sid(100));
        assert_eq!(decoded.match_resource_surrogate_id_max, sid(250));
        assert_eq!(decoded.sort_query_second_phase, Some(false));
        assert!(decoded.include_resource_type_id.is_none());
        assert!(decoded.include_resource_surrogate_id.is_none());
    }

    #[test]
    fn test_includes_token_seven_field_round_trip() {
        let nested = IncludesContinuationToken::new(ResourceTypeId(5), sid(300), sid(400));
        let token = IncludesContinuationToken::new(ResourceTypeId(5), sid(100), sid(250))
            .with_include_position(ResourceTypeId(2), sid(50))
            .with_sort_phase(true)
            .with_second_phase(nested.clone());

        let decoded = IncludesContinuationToken::decode(&token.encode()).unwrap();
        assert_eq!(decoded, token);
        assert_eq!(*decoded.second_phase.unwrap(), nested);
    }

    #[test]
    fn test_includes_token_malformed_decodes_to_none() {
        assert!(IncludesContinuationToken::decode("not-json").is_none());
        assert!(IncludesContinuationToken::decode("[1]").is_none());
        assert!(IncludesContinuationToken::decode("[1,2,3,4]").is_none());
        assert!(IncludesContinuationToken::decode("[1,2,\"x\"]").is_none());
        // field 5 present without field 4
        assert!(IncludesContinuationToken::decode("[5,100,250,null,7]").is_none());
        // nested token that is itself malformed fails the whole decode
        assert!(IncludesContinuationToken::decode("[5,100,250,null,null,true,\"junk\"]").is_none());
    }

    #[test]
    fn test_includes_token_negative_ids_rejected() {
        assert!(IncludesContinuationToken::decode("[5,-100,250]").is_none());
    }
}
