//! Structured extraction of stage records from raw completion text
//!
//! Three tiers, tried in order:
//! 1. the whole (trimmed) completion parses as the expected shape;
//! 2. a balanced `{...}` / `[...]` span inside surrounding prose parses;
//! 3. a sentinel record of the expected shape, every field marked.
//!
//! `extract` is total: it always hands back a well-formed record.

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::PipelineError;
use crate::models::{ExtractionTier, Extracted, Provenance, SentinelCause, SENTINEL_MARKER};
use crate::Result;

/// A record type a stage can extract into.
pub trait StageShape: DeserializeOwned + Serialize + Sized {
    /// Human-readable shape name for logs and errors.
    const SHAPE: &'static str;

    /// Opening and closing delimiters of the serialized shape.
    const DELIMITERS: (char, char) = ('{', '}');

    /// Record with every field set to the sentinel marker and numbers at zero.
    fn sentinel() -> Self;

    /// Post-parse checks beyond what serde enforces.
    fn validate(self) -> std::result::Result<Self, String> {
        Ok(self)
    }
}

/// Extract `T` from `raw`, falling back to a sentinel record.
pub fn extract<T: StageShape>(raw: &str) -> Extracted<T> {
    match try_extract::<T>(raw) {
        Ok((record, tier)) => {
            debug!(shape = T::SHAPE, ?tier, "Extraction succeeded");
            Extracted {
                record,
                provenance: Provenance::Model { tier },
            }
        }
        Err(e) => {
            warn!(shape = T::SHAPE, error = %e, "Extraction failed, substituting sentinel");
            sentinel(SentinelCause::Malformed {
                detail: e.to_string(),
            })
        }
    }
}

/// Sentinel record of shape `T`, tagged with why it was substituted.
pub fn sentinel<T: StageShape>(cause: SentinelCause) -> Extracted<T> {
    Extracted {
        record: T::sentinel(),
        provenance: Provenance::Sentinel { cause },
    }
}

/// Tiers 1 and 2 only; reports `MalformedOutput` instead of substituting.
pub fn try_extract<T: StageShape>(raw: &str) -> Result<(T, ExtractionTier)> {
    let direct_err = match parse_as::<T>(raw.trim()) {
        Ok(record) => return Ok((record, ExtractionTier::Direct)),
        Err(e) => e,
    };

    let (open, close) = T::DELIMITERS;
    let mut candidates = 0usize;

    for span in balanced_spans(raw, open, close) {
        candidates += 1;
        if let Ok(record) = parse_as::<T>(span) {
            return Ok((record, ExtractionTier::Embedded));
        }
    }

    Err(PipelineError::MalformedOutput {
        shape: T::SHAPE,
        detail: if candidates == 0 {
            format!("no '{}...{}' span found ({})", open, close, direct_err)
        } else {
            format!("{} candidate span(s) failed to parse ({})", candidates, direct_err)
        },
    })
}

fn parse_as<T: StageShape>(text: &str) -> std::result::Result<T, String> {
    serde_json::from_str::<T>(text)
        .map_err(|e| e.to_string())
        .and_then(T::validate)
}

/// Balanced `open ... close` spans of `text`, outermost first, left to right.
///
/// Delimiters inside JSON string literals are ignored. After each candidate
/// the scan resumes one character past its opening delimiter, so nested spans
/// are offered once their enclosing span has been tried.
pub fn balanced_spans(text: &str, open: char, close: char) -> impl Iterator<Item = &str> + '_ {
    let mut search_from = 0usize;

    std::iter::from_fn(move || {
        while search_from < text.len() {
            let start = search_from + text[search_from..].find(open)?;
            search_from = start + open.len_utf8();

            if let Some(len) = matching_close(&text[start..], open, close) {
                return Some(&text[start..start + len]);
            }
        }
        None
    })
}

/// Byte length of the balanced span at the start of `s` (which begins with `open`).
fn matching_close(s: &str, open: char, close: char) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in s.char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }

        if c == '"' {
            in_string = true;
        } else if c == open {
            depth += 1;
        } else if c == close {
            depth = depth.checked_sub(1)?;
            if depth == 0 {
                return Some(i + c.len_utf8());
            }
        }
    }

    None
}

/// True for text that is exactly the sentinel marker.
pub fn is_marker(text: &str) -> bool {
    text == SENTINEL_MARKER
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{PerceptionRecord, PlanSet};

    const PERCEPTION_JSON: &str = r#"{"market_overview":"ok","key_indicators":{},"recent_news":["n1","n2","n3"],"industry_trends":{}}"#;

    #[test]
    fn test_direct_tier_for_clean_json() {
        let (record, tier) = try_extract::<PerceptionRecord>(PERCEPTION_JSON).unwrap();
        assert_eq!(tier, ExtractionTier::Direct);
        assert_eq!(record.recent_news.len(), 3);

        let padded = format!("\n  {}  \n", PERCEPTION_JSON);
        let (_, tier) = try_extract::<PerceptionRecord>(&padded).unwrap();
        assert_eq!(tier, ExtractionTier::Direct);
    }

    #[test]
    fn test_embedded_tier_matches_direct_result() {
        let wrapped = format!("Here is the result:\n{}\nHope this helps", PERCEPTION_JSON);
        let embedded = extract::<PerceptionRecord>(&wrapped);
        let direct = extract::<PerceptionRecord>(PERCEPTION_JSON);

        assert_eq!(
            embedded.provenance,
            Provenance::Model { tier: ExtractionTier::Embedded }
        );
        assert_eq!(embedded.record, direct.record);
    }

    #[test]
    fn test_fenced_block_is_recovered() {
        let fenced = format!("```json\n{}\n```", PERCEPTION_JSON);
        let (_, tier) = try_extract::<PerceptionRecord>(&fenced).unwrap();
        assert_eq!(tier, ExtractionTier::Embedded);
    }

    #[test]
    fn test_prose_yields_sentinel() {
        let out = extract::<PerceptionRecord>("I cannot help with market data today.");
        assert!(out.is_sentinel());
        assert!(is_marker(&out.record.market_overview));
        assert!(matches!(
            out.provenance,
            Provenance::Sentinel { cause: SentinelCause::Malformed { .. } }
        ));
    }

    #[test]
    fn test_braces_inside_strings_do_not_confuse_scanner() {
        let text = r#"Note {draft}: {"market_overview":"range {3,5} bound \"}\"","key_indicators":{},"recent_news":[],"industry_trends":{}} end"#;
        let (record, tier) = try_extract::<PerceptionRecord>(text).unwrap();
        assert_eq!(tier, ExtractionTier::Embedded);
        assert_eq!(record.market_overview, "range {3,5} bound \"}\"");
    }

    #[test]
    fn test_nested_record_found_inside_wrapper() {
        let text = format!(r#"{{"result": {}}}"#, PERCEPTION_JSON);
        let (record, tier) = try_extract::<PerceptionRecord>(&text).unwrap();
        assert_eq!(tier, ExtractionTier::Embedded);
        assert_eq!(record.market_overview, "ok");
    }

    #[test]
    fn test_array_shape_uses_brackets() {
        let text = r#"See [1] below.
[{"id":"A","hypothesis":"h","approach":"a","expected_outcome":"e","confidence":0.6,"pros":["p1","p2","p3"],"cons":["c1","c2"]}]
Thanks."#;
        let (plans, tier) = try_extract::<PlanSet>(text).unwrap();
        assert_eq!(tier, ExtractionTier::Embedded);
        assert_eq!(plans.ids(), vec!["A"]);
    }

    #[test]
    fn test_unbalanced_text_has_no_spans() {
        assert_eq!(balanced_spans("{ never closed", '{', '}').count(), 0);
        let spans: Vec<&str> = balanced_spans("a {b {c}} d {e}", '{', '}').collect();
        assert_eq!(spans, vec!["{b {c}}", "{c}", "{e}"]);
    }

    #[test]
    fn test_malformed_error_reports_shape() {
        let err = try_extract::<PlanSet>("no arrays here").unwrap_err();
        match err {
            PipelineError::MalformedOutput { shape, detail } => {
                assert_eq!(shape, PlanSet::SHAPE);
                assert!(detail.contains("no '[...]' span"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
