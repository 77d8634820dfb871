//! Test case units and grouping identities
//!
//! Discovery hands the engine a flat, ordered list of [`TestCaseUnit`]s. Each
//! unit points at its method, which points at its class, which points at its
//! collection; runners regroup the list level by level with [`group_by`].

use futures::future::BoxFuture;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use crate::executor::TestContext;
use crate::fixtures::FixtureDefinition;

/// Body of a test case
pub type TestBody = Arc<dyn Fn(TestContext) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// Per-case teardown, run after the body whatever its outcome
pub type TeardownFn = TestBody;

/// Level of the grouping hierarchy
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitKind {
    Assembly,
    Collection,
    Class,
    Method,
    Case,
}

impl fmt::Display for UnitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnitKind::Assembly => write!(f, "assembly"),
            UnitKind::Collection => write!(f, "collection"),
            UnitKind::Class => write!(f, "class"),
            UnitKind::Method => write!(f, "method"),
            UnitKind::Case => write!(f, "case"),
        }
    }
}

/// Capabilities every runnable unit exposes to the runners
pub trait ExecutionUnit: Send + Sync + 'static {
    fn kind(&self) -> UnitKind;

    /// Identity used to group cases; unique among siblings
    fn unit_name(&self) -> &str;
}

/// The whole run; owns assembly-scoped fixtures
pub struct TestAssembly {
    pub name: String,
    pub fixtures: Vec<FixtureDefinition>,
}

impl TestAssembly {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fixtures: Vec::new(),
        }
    }

    pub fn with_fixture(mut self, fixture: FixtureDefinition) -> Self {
        self.fixtures.push(fixture);
        self
    }
}

impl ExecutionUnit for TestAssembly {
    fn kind(&self) -> UnitKind {
        UnitKind::Assembly
    }

    fn unit_name(&self) -> &str {
        &self.name
    }
}

/// Named group of classes sharing collection fixtures
pub struct TestCollection {
    pub name: String,
    pub fixtures: Vec<FixtureDefinition>,
    /// Run this collection alone, after every parallel collection finished
    pub disable_parallelization: bool,
}

impl TestCollection {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fixtures: Vec::new(),
            disable_parallelization: false,
        }
    }

    pub fn with_fixture(mut self, fixture: FixtureDefinition) -> Self {
        self.fixtures.push(fixture);
        self
    }

    pub fn disable_parallelization(mut self) -> Self {
        self.disable_parallelization = true;
        self
    }
}

impl ExecutionUnit for TestCollection {
    fn kind(&self) -> UnitKind {
        UnitKind::Collection
    }

    fn unit_name(&self) -> &str {
        &self.name
    }
}

pub struct TestClass {
    pub name: String,
    pub collection: Arc<TestCollection>,
    pub fixtures: Vec<FixtureDefinition>,
}

impl TestClass {
    pub fn new(name: impl Into<String>, collection: Arc<TestCollection>) -> Self {
        Self {
            name: name.into(),
            collection,
            fixtures: Vec::new(),
        }
    }

    pub fn with_fixture(mut self, fixture: FixtureDefinition) -> Self {
        self.fixtures.push(fixture);
        self
    }
}

impl ExecutionUnit for TestClass {
    fn kind(&self) -> UnitKind {
        UnitKind::Class
    }

    fn unit_name(&self) -> &str {
        &self.name
    }
}

pub struct TestMethod {
    pub name: String,
    pub class: Arc<TestClass>,
}

impl TestMethod {
    pub fn new(name: impl Into<String>, class: Arc<TestClass>) -> Self {
        Self {
            name: name.into(),
            class,
        }
    }
}

impl ExecutionUnit for TestMethod {
    fn kind(&self) -> UnitKind {
        UnitKind::Method
    }

    fn unit_name(&self) -> &str {
        &self.name
    }
}

/// One runnable test
pub struct TestCaseUnit {
    pub id: String,
    pub display_name: String,
    pub method: Arc<TestMethod>,
    pub traits: BTreeMap<String, BTreeSet<String>>,
    pub explicit: bool,
    pub skip_reason: Option<String>,
    pub body: TestBody,
    pub teardown: Option<TeardownFn>,
}

impl TestCaseUnit {
    pub fn new<F, Fut>(id: impl Into<String>, method: Arc<TestMethod>, body: F) -> Self
    where
        F: Fn(TestContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let id = id.into();
        Self {
            display_name: format!("{}.{}", method.class.name, method.name),
            id,
            method,
            traits: BTreeMap::new(),
            explicit: false,
            skip_reason: None,
            body: boxed(body),
            teardown: None,
        }
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = name.into();
        self
    }

    pub fn with_trait(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.traits.entry(key.into()).or_default().insert(value.into());
        self
    }

    /// Only run when explicit tests are requested
    pub fn explicit(mut self) -> Self {
        self.explicit = true;
        self
    }

    /// Statically skipped; the body never runs
    pub fn skip(mut self, reason: impl Into<String>) -> Self {
        self.skip_reason = Some(reason.into());
        self
    }

    pub fn with_teardown<F, Fut>(mut self, teardown: F) -> Self
    where
        F: Fn(TestContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.teardown = Some(boxed(teardown));
        self
    }

    pub fn class(&self) -> &Arc<TestClass> {
        &self.method.class
    }

    pub fn collection(&self) -> &Arc<TestCollection> {
        &self.method.class.collection
    }

    pub fn info(&self) -> CaseInfo {
        CaseInfo {
            id: self.id.clone(),
            display_name: self.display_name.clone(),
            collection: self.collection().name.clone(),
            class: self.class().name.clone(),
            method: self.method.name.clone(),
            traits: self.traits.clone(),
            explicit: self.explicit,
        }
    }
}

impl ExecutionUnit for TestCaseUnit {
    fn kind(&self) -> UnitKind {
        UnitKind::Case
    }

    fn unit_name(&self) -> &str {
        &self.id
    }
}

impl fmt::Debug for TestCaseUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestCaseUnit")
            .field("id", &self.id)
            .field("display_name", &self.display_name)
            .field("explicit", &self.explicit)
            .field("skip_reason", &self.skip_reason)
            .finish_non_exhaustive()
    }
}

fn boxed<F, Fut>(f: F) -> TestBody
where
    F: Fn(TestContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(move |ctx: TestContext| -> BoxFuture<'static, anyhow::Result<()>> {
        Box::pin(f(ctx))
    })
}

/// Serializable identity of a case, as carried by events
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CaseInfo {
    pub id: String,
    pub display_name: String,
    pub collection: String,
    pub class: String,
    pub method: String,
    pub traits: BTreeMap<String, BTreeSet<String>>,
    pub explicit: bool,
}

impl fmt::Display for CaseInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]", self.display_name, self.id)
    }
}

/// Returned from a body to report the case as skipped at run time
#[derive(Debug, thiserror::Error)]
#[error("Test skipped: {0}")]
pub struct SkipTest(pub String);

/// Skip the running case: `return skip("no database");`
pub fn skip(reason: impl Into<String>) -> anyhow::Result<()> {
    Err(SkipTest(reason.into()).into())
}

/// Split `cases` by the unit `select` picks, preserving first-appearance order
pub fn group_by<U, F>(cases: &[Arc<TestCaseUnit>], select: F) -> Vec<(Arc<U>, Vec<Arc<TestCaseUnit>>)>
where
    U: ExecutionUnit,
    F: Fn(&TestCaseUnit) -> &Arc<U>,
{
    let mut groups: Vec<(Arc<U>, Vec<Arc<TestCaseUnit>>)> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for case in cases {
        let unit = select(case.as_ref());
        match index.get(unit.unit_name()) {
            Some(&i) => groups[i].1.push(case.clone()),
            None => {
                index.insert(unit.unit_name().to_string(), groups.len());
                groups.push((unit.clone(), vec![case.clone()]));
            }
        }
    }

    groups
}
