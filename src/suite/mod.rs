//! Test suites: building the ordered case list for a target and binding it
//! to the live reservation the cases run against.

#![allow(missing_docs)]

pub mod bodies;
pub mod case;

use std::sync::Arc;

use regex::Regex;

use crate::core::errors::{Result, ShtError};
use crate::registry::{Registry, TestCaseKind};
use crate::target::{TargetDescriptor, TargetHandle};
use crate::transport::FileStore;

pub use case::{CaseFailure, CaseResult, ExpectedFailureCase, RegisteredCase, TestCase};

/// Everything a case body touches while it runs.
#[derive(Clone)]
pub struct CaseContext {
    pub target: Arc<TargetHandle>,
    /// Resource a controller service drives, when configured.
    pub related: Option<Arc<TargetHandle>>,
    pub store: Arc<dyn FileStore>,
}

impl CaseContext {
    #[must_use]
    pub fn new(target: Arc<TargetHandle>, store: Arc<dyn FileStore>) -> Self {
        Self {
            target,
            related: None,
            store,
        }
    }

    #[must_use]
    pub fn with_related(mut self, related: Option<Arc<TargetHandle>>) -> Self {
        self.related = related;
        self
    }
}

// ──────────────────── plan ────────────────────

/// Ordered cases for one target, before they are bound to a reservation.
pub struct SuitePlan {
    target: String,
    kinds: Vec<TestCaseKind>,
    cases: Vec<Box<dyn TestCase>>,
}

impl SuitePlan {
    /// Select cases from the registry and wrap configured expected failures.
    ///
    /// Pure: the same descriptor and registry always yield the same plan.
    pub fn build(descriptor: &TargetDescriptor, registry: &Registry) -> Result<Self> {
        let kinds = registry.plan(
            descriptor.family,
            descriptor.availability,
            &descriptor.supported_commands,
        )?;

        let mut cases: Vec<Box<dyn TestCase>> = Vec::new();
        for &kind in &kinds {
            for &method in kind.methods() {
                let case = RegisteredCase::new(kind, method, descriptor.name.as_str());
                let qualified = case.qualified_name();
                match descriptor.expected_failures().get(&qualified) {
                    Some(raw) => {
                        let pattern = Regex::new(raw).map_err(|err| ShtError::InvalidConfig {
                            details: format!(
                                "{}: expected failure pattern for {qualified} is invalid: {err}",
                                descriptor.name
                            ),
                        })?;
                        cases.push(Box::new(ExpectedFailureCase::new(Box::new(case), pattern)));
                    }
                    None => cases.push(Box::new(case)),
                }
            }
        }

        Ok(Self {
            target: descriptor.name.clone(),
            kinds,
            cases,
        })
    }

    #[must_use]
    pub fn target(&self) -> &str {
        &self.target
    }

    #[must_use]
    pub fn kinds(&self) -> &[TestCaseKind] {
        &self.kinds
    }

    #[must_use]
    pub fn case_ids(&self) -> Vec<String> {
        self.cases.iter().map(|case| case.id()).collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.cases.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cases.is_empty()
    }

    #[must_use]
    pub fn bind(self, context: CaseContext) -> TestSuite {
        TestSuite {
            plan: self,
            context,
        }
    }
}

/// A plan bound to its live target; what the executor runs.
pub struct TestSuite {
    plan: SuitePlan,
    context: CaseContext,
}

impl TestSuite {
    #[must_use]
    pub fn target(&self) -> &str {
        self.plan.target()
    }

    #[must_use]
    pub fn cases(&self) -> &[Box<dyn TestCase>] {
        &self.plan.cases
    }

    #[must_use]
    pub fn context(&self) -> &CaseContext {
        &self.context
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.plan.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.plan.is_empty()
    }
}
