//! Grading driver: registered test cases, per-test sessions, scoring,
//! and bounded suite concurrency.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::future::{join_all, try_join_all, BoxFuture};
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::error::Result;
use crate::notebook::CellSelector;
use crate::session::{Session, SessionOptions};
use crate::track::replace::FunctionReplacement;

pub mod report;

pub use report::{SuiteReport, TestReport};

/// One graded condition. Validated at construction: a check always
/// carries its truth value and score delta, comments are optional.
#[derive(Debug, Clone)]
pub struct Check {
    passed: bool,
    delta: f64,
    success_comment: Option<String>,
    failure_comment: Option<String>,
}

impl Check {
    pub fn new(passed: bool, delta: f64) -> Self {
        Self {
            passed,
            delta,
            success_comment: None,
            failure_comment: None,
        }
    }

    /// Passes only when every condition holds.
    pub fn all<I>(conditions: I, delta: f64) -> Self
    where
        I: IntoIterator<Item = bool>,
    {
        Self::new(conditions.into_iter().all(|c| c), delta)
    }

    pub fn on_success(mut self, comment: impl Into<String>) -> Self {
        self.success_comment = Some(comment.into());
        self
    }

    pub fn on_failure(mut self, comment: impl Into<String>) -> Self {
        self.failure_comment = Some(comment.into());
        self
    }
}

/// Accumulate checks into a score (clamped at zero) and comment list.
pub(crate) fn tally(checks: &[Check]) -> (f64, Vec<String>) {
    let mut score = 0.0;
    let mut comments = Vec::new();
    for check in checks {
        if check.passed {
            score += check.delta;
            if let Some(c) = &check.success_comment {
                comments.push(c.clone());
            }
        } else if let Some(c) = &check.failure_comment {
            comments.push(c.clone());
        }
    }
    (score.max(0.0), comments)
}

/// A unit of preparation executed before a test body, in order.
#[derive(Debug, Clone)]
pub enum SetupStep {
    /// Execute cells matched by a selector.
    Cells(CellSelector),
    /// Execute literal code as a synthesized cell.
    Code(String),
    /// Execute a script file as a synthesized cell.
    Script(PathBuf),
    /// Nested steps, executed in order.
    Group(Vec<SetupStep>),
}

impl SetupStep {
    fn apply<'a>(&'a self, session: &'a Session) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            match self {
                SetupStep::Cells(selector) => {
                    session.execute_cells(selector).await?;
                }
                SetupStep::Code(code) => {
                    session.execute_code(code).await?;
                }
                SetupStep::Script(path) => {
                    session.execute_script(path).await?;
                }
                SetupStep::Group(steps) => {
                    for step in steps {
                        step.apply(session).await?;
                    }
                }
            }
            Ok(())
        })
    }
}

type TestBody = Box<dyn Fn(Vec<Session>) -> BoxFuture<'static, Result<Vec<Check>>> + Send + Sync>;
type Hook = Box<dyn Fn() -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// A registered test: session preparation plus a body producing checks.
pub struct TestCase {
    pub id: String,
    pub name: String,
    pub max_score: f64,
    pub setup: Vec<SetupStep>,
    /// Prepare two identically set-up sessions and pass both to the body.
    pub second_session: bool,
    body: TestBody,
}

impl TestCase {
    pub fn new<F>(id: impl Into<String>, name: impl Into<String>, max_score: f64, body: F) -> Self
    where
        F: Fn(Vec<Session>) -> BoxFuture<'static, Result<Vec<Check>>> + Send + Sync + 'static,
    {
        Self {
            id: id.into(),
            name: name.into(),
            max_score,
            setup: Vec::new(),
            second_session: false,
            body: Box::new(body),
        }
    }

    pub fn with_setup(mut self, step: SetupStep) -> Self {
        self.setup.push(step);
        self
    }

    pub fn with_second_session(mut self) -> Self {
        self.second_session = true;
        self
    }
}

/// Explicit collection of tests and suite-level hooks, passed into the
/// entry point instead of accumulated through global state.
#[derive(Default)]
pub struct TestRegistry {
    tests: Vec<TestCase>,
    before_all: Vec<Hook>,
    after_all: Vec<Hook>,
}

impl TestRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, test: TestCase) -> &mut Self {
        self.tests.push(test);
        self
    }

    pub fn before_all<F>(&mut self, hook: F) -> &mut Self
    where
        F: Fn() -> BoxFuture<'static, Result<()>> + Send + Sync + 'static,
    {
        self.before_all.push(Box::new(hook));
        self
    }

    pub fn after_all<F>(&mut self, hook: F) -> &mut Self
    where
        F: Fn() -> BoxFuture<'static, Result<()>> + Send + Sync + 'static,
    {
        self.after_all.push(Box::new(hook));
        self
    }

    pub fn tests(&self) -> &[TestCase] {
        &self.tests
    }
}

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub session: SessionOptions,
    /// Admission gate: how many tests (and therefore kernels) may run at
    /// once.
    pub concurrency: usize,
    /// Only run the test with this id.
    pub filter: Option<String>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            session: SessionOptions::default(),
            concurrency: 1000,
            filter: None,
        }
    }
}

async fn run_test(test: &TestCase, notebook: &Path, options: &RunOptions) -> TestReport {
    let outcome = run_test_inner(test, notebook, options).await;
    let (achieved, comments) = match outcome {
        Ok(checks) => tally(&checks),
        // an error zeroes this test without aborting siblings
        Err(err) => (0.0, vec![err.to_string()]),
    };
    TestReport {
        test: test.id.clone(),
        name: test.name.clone(),
        achieved_score: achieved,
        total_score: test.max_score,
        comments,
    }
}

async fn run_test_inner(
    test: &TestCase,
    notebook: &Path,
    options: &RunOptions,
) -> Result<Vec<Check>> {
    let count = if test.second_session { 2 } else { 1 };
    let mut sessions = Vec::with_capacity(count);
    for _ in 0..count {
        sessions.push(Session::open(notebook, &options.session)?);
    }

    let result = async {
        try_join_all(sessions.iter().map(|s| s.start())).await?;
        try_join_all(sessions.iter().map(|s| async {
            for step in &test.setup {
                step.apply(s).await?;
            }
            Ok::<(), crate::error::Error>(())
        }))
        .await?;

        debug!(test = %test.id, "running test body");
        (test.body)(sessions.clone()).await
    }
    .await;

    for session in &sessions {
        if let Err(err) = session.shutdown().await {
            warn!(test = %test.id, %err, "session shutdown failed");
        }
    }
    result
}

/// Run every (matching) registered test against `notebook`, bounded by
/// the configured admission gate, and aggregate the reports.
pub async fn run_suite(
    registry: &TestRegistry,
    notebook: &Path,
    options: &RunOptions,
) -> Result<SuiteReport> {
    for hook in &registry.before_all {
        hook().await?;
    }

    let gate = Arc::new(Semaphore::new(options.concurrency.max(1)));
    let selected: Vec<&TestCase> = registry
        .tests()
        .iter()
        .filter(|t| options.filter.as_deref().is_none_or(|f| f == t.id))
        .collect();

    let reports = join_all(selected.iter().map(|test| {
        let gate = gate.clone();
        async move {
            let _permit = gate.acquire().await.expect("semaphore never closed");
            run_test(test, notebook, options).await
        }
    }))
    .await;

    for hook in &registry.after_all {
        hook().await?;
    }

    Ok(SuiteReport::aggregate(reports))
}

/// Python source injected in place of `input` while replaying cells
/// tagged `nb:input`: echoes the prompt back as the entered value.
const INPUT_STUB: &str = "def _nbt_input(prompt=''):\n    return prompt";

/// Tag marking cells that read interactive input during replay.
pub const INPUT_TAG: &str = "nb:input";

/// The built-in suite: replay every code cell in order, substituting
/// `input` for cells tagged [`INPUT_TAG`].
pub fn default_registry() -> TestRegistry {
    let mut registry = TestRegistry::new();
    registry.register(TestCase::new("run", "run all cells", 0.0, |sessions| {
        Box::pin(async move {
            let session = sessions[0].clone();
            for cell in session.cells() {
                if !cell.is_code() {
                    continue;
                }
                if cell.has_tag(INPUT_TAG) {
                    let mut stub =
                        FunctionReplacement::install(&session, "input", INPUT_STUB, "_nbt_input")
                            .await?;
                    let executed = session.execute_cell_at(cell.index).await;
                    stub.restore().await?;
                    executed?;
                } else {
                    session.execute_cell_at(cell.index).await?;
                }
            }
            Ok(Vec::new())
        })
    }));
    registry
}
