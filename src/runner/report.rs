//! Score report aggregation and rendering.

use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TestReport {
    pub test: String,
    pub name: String,
    pub achieved_score: f64,
    pub total_score: f64,
    pub comments: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SuiteReport {
    pub achieved_score: f64,
    pub total_score: f64,
    pub tests: Vec<TestReport>,
}

impl SuiteReport {
    pub fn aggregate(tests: Vec<TestReport>) -> Self {
        Self {
            achieved_score: tests.iter().map(|t| t.achieved_score).sum(),
            total_score: tests.iter().map(|t| t.total_score).sum(),
            tests,
        }
    }

    /// Tests that did not reach their maximum score.
    pub fn failures(&self) -> Vec<&TestReport> {
        self.tests
            .iter()
            .filter(|t| t.achieved_score < t.total_score)
            .collect()
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).expect("report serialization is infallible")
    }

    pub fn to_markdown(&self) -> String {
        let mut out = format!(
            "# Results ({} / {})\n\n",
            self.achieved_score, self.total_score
        );
        for test in &self.tests {
            out.push_str(&format!(
                "## {} ({} / {})\n",
                test.name, test.achieved_score, test.total_score
            ));
            for comment in &test.comments {
                out.push_str(&format!("- {comment}\n"));
            }
            out.push('\n');
        }
        out
    }
}
