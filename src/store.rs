//! Result store
//!
//! Persists exactly one grading record per (submission, question) pair.
//! Feedback stays a typed report list inside the engine and is serialized
//! only at this boundary; legacy blobs are parsed defensively.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::error::EngineError;
use crate::verdict::Verdict;
use crate::worker::TestCase;

/// Wrong-answer diagnostic payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WrongAnswerDetail {
    pub expected: String,
    pub actual: String,
}

/// Per-case verdict as it appears in feedback and on the wire
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerdictDetail {
    pub status: Verdict,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<WrongAnswerDetail>,
}

/// Execution result for one test case
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaseResult {
    pub success: bool,
    /// Program output, truncated for display; None for hidden cases
    #[serde(default)]
    pub output: Option<String>,
    /// Stderr/crash message, if any
    #[serde(default)]
    pub error: Option<String>,
    pub verdict: VerdictDetail,
}

/// Per-test-case feedback entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaseReport {
    /// The test case as shown to the learner; None when hidden
    #[serde(rename = "testCase", default)]
    pub test_case: Option<TestCase>,
    pub result: CaseResult,
}

/// The persisted grading record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GradingResult {
    pub submission_id: i64,
    pub question_id: i64,
    pub language: String,
    pub status: Verdict,
    pub test_cases_passed: u32,
    pub total_test_cases: u32,
    /// 0-100, integer-rounded
    pub score: u32,
    pub feedback: Vec<CaseReport>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl GradingResult {
    /// Placeholder record for submissions that predate the engine. The
    /// status is distinct so consumers never read "never graded" as
    /// "failed all tests".
    pub fn historical(
        submission_id: i64,
        question_id: i64,
        language: impl Into<String>,
        legacy_feedback: Option<&str>,
    ) -> Self {
        Self {
            submission_id,
            question_id,
            language: language.into(),
            status: Verdict::EvaluationUnavailable,
            test_cases_passed: 0,
            total_test_cases: 0,
            score: 0,
            feedback: legacy_feedback.map(parse_feedback).unwrap_or_default(),
            note: Some("evaluation was not performed for this historical submission".into()),
        }
    }
}

/// Deserialize a feedback blob, degrading to an empty list on malformed
/// input instead of failing the pipeline.
pub fn parse_feedback(raw: &str) -> Vec<CaseReport> {
    match serde_json::from_str(raw) {
        Ok(reports) => reports,
        Err(e) => {
            warn!(error = %e, "Malformed feedback blob, treating as empty");
            Vec::new()
        }
    }
}

/// Serialize feedback for the persistence boundary
pub fn serialize_feedback(reports: &[CaseReport]) -> String {
    serde_json::to_string(reports).unwrap_or_else(|_| "[]".into())
}

/// Storage for grading records
#[async_trait]
pub trait ResultStore: Send + Sync {
    /// Insert or replace the record for its (submission, question) pair
    async fn upsert(&self, result: GradingResult) -> Result<(), EngineError>;

    /// Fetch the record for a pair, if one exists
    async fn get(&self, submission_id: i64, question_id: i64) -> Option<GradingResult>;
}

/// One persisted row; feedback crosses this boundary serialized
struct StoredRow {
    record: GradingResult,
    feedback_json: String,
}

/// In-memory result store
#[derive(Default)]
pub struct MemoryResultStore {
    rows: RwLock<HashMap<(i64, i64), StoredRow>>,
}

impl MemoryResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records
    pub async fn len(&self) -> usize {
        self.rows.read().await.len()
    }
}

#[async_trait]
impl ResultStore for MemoryResultStore {
    async fn upsert(&self, result: GradingResult) -> Result<(), EngineError> {
        let key = (result.submission_id, result.question_id);
        let feedback_json = serialize_feedback(&result.feedback);
        let mut record = result;
        record.feedback = Vec::new();
        let replaced = self
            .rows
            .write()
            .await
            .insert(
                key,
                StoredRow {
                    record,
                    feedback_json,
                },
            )
            .is_some();
        debug!(
            submission_id = key.0,
            question_id = key.1,
            replaced,
            "Stored grading result"
        );
        Ok(())
    }

    async fn get(&self, submission_id: i64, question_id: i64) -> Option<GradingResult> {
        self.rows
            .read()
            .await
            .get(&(submission_id, question_id))
            .map(|row| {
                let mut record = row.record.clone();
                record.feedback = parse_feedback(&row.feedback_json);
                record
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(submission_id: i64, question_id: i64, score: u32) -> GradingResult {
        GradingResult {
            submission_id,
            question_id,
            language: "python".into(),
            status: if score == 100 {
                Verdict::Accepted
            } else {
                Verdict::WrongAnswer
            },
            test_cases_passed: score / 50,
            total_test_cases: 2,
            score,
            feedback: Vec::new(),
            note: None,
        }
    }

    #[tokio::test]
    async fn test_upsert_replaces_not_duplicates() {
        let store = MemoryResultStore::new();
        store.upsert(result(1, 10, 50)).await.unwrap();
        store.upsert(result(1, 10, 100)).await.unwrap();

        assert_eq!(store.len().await, 1);
        let row = store.get(1, 10).await.unwrap();
        assert_eq!(row.score, 100);
        assert_eq!(row.status, Verdict::Accepted);
    }

    #[tokio::test]
    async fn test_distinct_pairs_are_distinct_rows() {
        let store = MemoryResultStore::new();
        store.upsert(result(1, 10, 100)).await.unwrap();
        store.upsert(result(1, 11, 50)).await.unwrap();
        store.upsert(result(2, 10, 50)).await.unwrap();
        assert_eq!(store.len().await, 3);
    }

    #[tokio::test]
    async fn test_get_missing_is_none() {
        let store = MemoryResultStore::new();
        assert!(store.get(99, 1).await.is_none());
    }

    #[test]
    fn test_historical_record_is_tagged_distinctly() {
        let row = GradingResult::historical(5, 7, "java", None);
        assert_eq!(row.status, Verdict::EvaluationUnavailable);
        assert_eq!(row.score, 0);
        assert!(row.note.is_some());
    }

    #[test]
    fn test_parse_feedback_degrades_on_malformed_input() {
        assert!(parse_feedback("not json at all").is_empty());
        assert!(parse_feedback("{\"wrong\": \"shape\"}").is_empty());
        assert!(parse_feedback("[]").is_empty());
    }

    #[tokio::test]
    async fn test_feedback_survives_the_store_boundary() {
        let store = MemoryResultStore::new();
        let mut row = result(3, 9, 50);
        row.feedback = vec![CaseReport {
            test_case: None,
            result: CaseResult {
                success: false,
                output: Some("7".into()),
                error: None,
                verdict: VerdictDetail {
                    status: Verdict::WrongAnswer,
                    details: Some(WrongAnswerDetail {
                        expected: "8".into(),
                        actual: "7".into(),
                    }),
                },
            },
        }];
        store.upsert(row).await.unwrap();

        let fetched = store.get(3, 9).await.unwrap();
        assert_eq!(fetched.feedback.len(), 1);
        assert_eq!(fetched.feedback[0].result.output.as_deref(), Some("7"));
        let detail = fetched.feedback[0].result.verdict.details.as_ref().unwrap();
        assert_eq!(detail.expected, "8");
        assert_eq!(detail.actual, "7");
    }

    #[test]
    fn test_feedback_round_trip_via_boundary() {
        let reports = vec![CaseReport {
            test_case: None,
            result: CaseResult {
                success: false,
                output: None,
                error: None,
                verdict: VerdictDetail {
                    status: Verdict::WrongAnswer,
                    details: Some(WrongAnswerDetail {
                        expected: "8".into(),
                        actual: "7".into(),
                    }),
                },
            },
        }];
        let raw = serialize_feedback(&reports);
        let parsed = parse_feedback(&raw);
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].result.verdict.status, Verdict::WrongAnswer);
        assert!(raw.contains("\"testCase\":null"));
    }
}
