use indexmap::IndexMap;
use serde::de::{self, DeserializeSeed, IgnoredAny, SeqAccess, Visitor};
use serde::ser::SerializeSeq;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::error::Category;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("failed to unmarshal JSON: {0}")]
    Malformed(#[source] serde_json::Error),

    #[error("unexpected query_range shape: {0}")]
    Shape(#[source] serde_json::Error),

    #[error("failed to marshal JSON: {0}")]
    Encode(#[source] serde_json::Error),
}

/// A single `[timestamp, "value"]` pair. The value stays a string until
/// something needs it as a number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sample {
    pub timestamp: i64,
    pub value: String,
}

impl Sample {
    #[cfg(test)]
    pub fn new(timestamp: i64, value: impl Into<String>) -> Self {
        Self {
            timestamp,
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SeriesResult {
    #[serde(default)]
    pub metric: IndexMap<String, String>,
    #[serde(
        default,
        serialize_with = "encode_samples",
        deserialize_with = "decode_samples"
    )]
    pub values: Vec<Sample>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryRangeData {
    #[serde(rename = "resultType", default)]
    pub result_type: String,
    #[serde(default)]
    pub result: Vec<SeriesResult>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryRangeResponse {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub data: QueryRangeData,
}

impl QueryRangeResponse {
    pub fn decode(data: &[u8]) -> Result<Self, SchemaError> {
        serde_json::from_slice(data).map_err(|e| match e.classify() {
            Category::Data => SchemaError::Shape(e),
            Category::Io | Category::Syntax | Category::Eof => SchemaError::Malformed(e),
        })
    }

    pub fn encode(&self) -> Result<Vec<u8>, SchemaError> {
        serde_json::to_vec(self).map_err(SchemaError::Encode)
    }
}

pub fn encode_samples<S>(samples: &[Sample], serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    let mut seq = serializer.serialize_seq(Some(samples.len()))?;
    for sample in samples {
        seq.serialize_element(&(sample.timestamp, sample.value.as_str()))?;
    }
    seq.end()
}

pub fn decode_samples<'de, D>(deserializer: D) -> Result<Vec<Sample>, D::Error>
where
    D: Deserializer<'de>,
{
    deserializer.deserialize_seq(SamplesVisitor)
}

struct SamplesVisitor;

impl<'de> Visitor<'de> for SamplesVisitor {
    type Value = Vec<Sample>;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a list of [timestamp, \"value\"] pairs")
    }

    fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
    where
        A: SeqAccess<'de>,
    {
        let mut samples = Vec::with_capacity(seq.size_hint().unwrap_or(0));
        while let Some(sample) = seq.next_element_seed(SamplePair)? {
            samples.push(sample);
        }
        Ok(samples)
    }
}

struct SamplePair;

impl<'de> DeserializeSeed<'de> for SamplePair {
    type Value = Sample;

    fn deserialize<D>(self, deserializer: D) -> Result<Self::Value, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_seq(self)
    }
}

impl<'de> Visitor<'de> for SamplePair {
    type Value = Sample;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a [timestamp, \"value\"] pair")
    }

    fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
    where
        A: SeqAccess<'de>,
    {
        let timestamp: i64 = seq
            .next_element()?
            .ok_or_else(|| de::Error::invalid_length(0, &self))?;
        let value: String = seq
            .next_element()?
            .ok_or_else(|| de::Error::invalid_length(1, &self))?;
        if seq.next_element::<IgnoredAny>()?.is_some() {
            return Err(de::Error::invalid_length(3, &self));
        }
        Ok(Sample { timestamp, value })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BODY: &str = r#"{"status":"success","data":{"resultType":"matrix","result":[{"metric":{"__name__":"up","job":"prometheus","instance":"localhost:9090"},"values":[[1435781430,"1"],[1435781445,"0.5"]]},{"metric":{"__name__":"up","job":"node","instance":"localhost:9100"},"values":[[1435781430,"0"]]}]}}"#;

    #[test]
    fn test_decode_query_range() {
        let response = QueryRangeResponse::decode(BODY.as_bytes()).unwrap();
        assert_eq!(response.status, "success");
        assert_eq!(response.data.result_type, "matrix");
        assert_eq!(response.data.result.len(), 2);

        let first = &response.data.result[0];
        assert_eq!(first.metric["job"], "prometheus");
        assert_eq!(
            first.values,
            vec![Sample::new(1435781430, "1"), Sample::new(1435781445, "0.5")]
        );
    }

    #[test]
    fn test_encode_matches_upstream_bytes() {
        let response = QueryRangeResponse::decode(BODY.as_bytes()).unwrap();
        let encoded = response.encode().unwrap();
        assert_eq!(String::from_utf8(encoded).unwrap(), BODY);
    }

    #[test]
    fn test_labels_keep_their_order() {
        let body = r#"{"status":"success","data":{"resultType":"matrix","result":[{"metric":{"z":"1","a":"2","m":"3"},"values":[]}]}}"#;
        let response = QueryRangeResponse::decode(body.as_bytes()).unwrap();
        let keys: Vec<&str> = response.data.result[0].metric.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["z", "a", "m"]);
        assert_eq!(response.encode().unwrap(), body.as_bytes());
    }

    #[test]
    fn test_round_trip() {
        let mut metric = IndexMap::new();
        metric.insert("__name__".to_string(), "node_load1".to_string());
        metric.insert("instance".to_string(), "db-1".to_string());
        let response = QueryRangeResponse {
            status: "success".into(),
            data: QueryRangeData {
                result_type: "matrix".into(),
                result: vec![
                    SeriesResult {
                        metric,
                        values: vec![Sample::new(-5, "1e-7"), Sample::new(0, "NaN")],
                    },
                    SeriesResult::default(),
                ],
            },
        };

        let decoded = QueryRangeResponse::decode(&response.encode().unwrap()).unwrap();
        assert_eq!(decoded, response);
    }

    #[test]
    fn test_unknown_fields_are_dropped() {
        let body = r#"{"status":"success","warnings":["w"],"data":{"resultType":"matrix","stats":{},"result":[{"metric":{},"values":[[1,"2"]],"extra":true}]}}"#;
        let response = QueryRangeResponse::decode(body.as_bytes()).unwrap();
        assert_eq!(
            String::from_utf8(response.encode().unwrap()).unwrap(),
            r#"{"status":"success","data":{"resultType":"matrix","result":[{"metric":{},"values":[[1,"2"]]}]}}"#
        );
    }

    #[test]
    fn test_missing_fields_default() {
        let response = QueryRangeResponse::decode(br#"{"status":"error"}"#).unwrap();
        assert_eq!(response.status, "error");
        assert!(response.data.result.is_empty());
    }

    #[test]
    fn test_malformed_json() {
        let err = QueryRangeResponse::decode(br#"{"status":"success","data":{"#).unwrap_err();
        assert!(matches!(err, SchemaError::Malformed(_)));

        let err = QueryRangeResponse::decode(b"<html>bad gateway</html>").unwrap_err();
        assert!(matches!(err, SchemaError::Malformed(_)));
    }

    #[test]
    fn test_three_element_sample_is_a_shape_error() {
        let body = br#"{"status":"success","data":{"resultType":"matrix","result":[{"metric":{},"values":[[1,"2",3]]}]}}"#;
        let err = QueryRangeResponse::decode(body).unwrap_err();
        assert!(matches!(err, SchemaError::Shape(_)));
    }

    #[test]
    fn test_short_sample_is_a_shape_error() {
        let body = br#"{"status":"success","data":{"resultType":"matrix","result":[{"metric":{},"values":[[1]]}]}}"#;
        let err = QueryRangeResponse::decode(body).unwrap_err();
        assert!(matches!(err, SchemaError::Shape(_)));
    }

    #[test]
    fn test_swapped_sample_types_are_shape_errors() {
        let numeric_value = br#"{"status":"success","data":{"resultType":"matrix","result":[{"metric":{},"values":[[1,2]]}]}}"#;
        assert!(matches!(
            QueryRangeResponse::decode(numeric_value).unwrap_err(),
            SchemaError::Shape(_)
        ));

        let string_timestamp = br#"{"status":"success","data":{"resultType":"matrix","result":[{"metric":{},"values":[["1","2"]]}]}}"#;
        assert!(matches!(
            QueryRangeResponse::decode(string_timestamp).unwrap_err(),
            SchemaError::Shape(_)
        ));
    }
}
