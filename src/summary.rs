// Reduces per-file outcomes into the batch summary the rendering layer
// prints. Built once per invocation and never persisted.

use std::path::PathBuf;

use serde::Serialize;

use crate::types::UploadResult;

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FailureDetail {
    pub path: PathBuf,
    pub title: String,
    pub stage: &'static str,
    pub reason: String,
}

#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct BatchSummary {
    pub succeeded_count: usize,
    pub failed_count: usize,
    pub failures: Vec<FailureDetail>,
    /// Every file's outcome, in input order.
    pub results: Vec<UploadResult>,
}

impl BatchSummary {
    pub fn summarize(results: Vec<UploadResult>) -> Self {
        let failures: Vec<FailureDetail> = results
            .iter()
            .filter(|r| !r.success)
            .map(|r| FailureDetail {
                path: r.path.clone(),
                title: r.title.clone(),
                stage: r.failed_stage.unwrap_or("unknown"),
                reason: r.error.clone().unwrap_or_default(),
            })
            .collect();

        Self {
            succeeded_count: results.len() - failures.len(),
            failed_count: failures.len(),
            failures,
            results,
        }
    }

    /// The invocation succeeds only if no file failed.
    pub fn is_success(&self) -> bool {
        self.failed_count == 0
    }

    pub fn total(&self) -> usize {
        self.succeeded_count + self.failed_count
    }
}
