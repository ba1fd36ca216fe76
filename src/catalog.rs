//! Stage catalog: immutable registry of workflow-types and their ordered
//! stage names.
//!
//! Pure lookup table with no behavior. Index 0 of every sequence is the
//! initial stage for a fresh actor instance. The catalog is read-only shared
//! data, safe for unsynchronized concurrent reads.

use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;

use crate::WorkflowError;

/// Immutable mapping from workflow-type name to its ordered stage names.
#[derive(Clone, Default)]
pub struct StageCatalog {
    inner: Arc<HashMap<String, Vec<String>>>,
}

impl StageCatalog {
    pub fn builder() -> StageCatalogBuilder {
        StageCatalogBuilder {
            map: HashMap::new(),
            errors: Vec::new(),
        }
    }

    /// Ordered stage sequence for a workflow-type.
    pub fn stages_for(&self, workflow: &str) -> Result<&[String], WorkflowError> {
        self.inner
            .get(workflow)
            .map(|v| v.as_slice())
            .ok_or_else(|| WorkflowError::UnknownWorkflow {
                workflow: workflow.to_string(),
            })
    }

    /// Number of stages for a workflow-type.
    pub fn count(&self, workflow: &str) -> Result<usize, WorkflowError> {
        self.stages_for(workflow).map(|s| s.len())
    }

    pub fn contains(&self, workflow: &str) -> bool {
        self.inner.contains_key(workflow)
    }

    pub fn workflow_names(&self) -> Vec<String> {
        self.inner.keys().cloned().collect()
    }

    /// Build a catalog from a TOML document of the shape:
    ///
    /// ```toml
    /// [workflows]
    /// Yeast = ["Batch Samples", "Tx Yeast"]
    /// ```
    pub fn from_toml_str(s: &str) -> Result<Self, WorkflowError> {
        let config: CatalogConfig =
            toml::from_str(s).map_err(|e| WorkflowError::MalformedInput(e.to_string()))?;
        Self::from_config(config)
    }

    /// Build a catalog from an already-deserialized configuration.
    pub fn from_config(config: CatalogConfig) -> Result<Self, WorkflowError> {
        let mut b = Self::builder();
        for (name, stages) in config.workflows {
            b = b.register(name, stages);
        }
        b.build_result()
    }

    /// The two reference workflows shipped as built-in configuration: a yeast
    /// lab protocol and a gateway cloning protocol.
    pub fn reference_catalog() -> Self {
        Self::builder()
            .register(
                "Yeast",
                [
                    "Batch Samples",
                    "Tx Yeast",
                    "PoolPrep",
                    "Pick & Grow Colonies",
                    "QC",
                    "Tx Ecoli/Agro",
                ],
            )
            .register(
                "Gateway",
                [
                    "Batch Samples",
                    "Gateway RXN",
                    "E.Coli Tx",
                    "Pick & Grow Colonies",
                    "Miniprep",
                    "QC",
                    "Tx Ecoli/Agro",
                ],
            )
            .build()
    }
}

/// Serde shape for catalog configuration files.
#[derive(Debug, Clone, Deserialize)]
pub struct CatalogConfig {
    pub workflows: HashMap<String, Vec<String>>,
}

pub struct StageCatalogBuilder {
    map: HashMap<String, Vec<String>>,
    errors: Vec<String>,
}

impl StageCatalogBuilder {
    /// Register a workflow-type with its ordered stages. Empty sequences and
    /// duplicate registrations are rejected at build time.
    pub fn register<I, S>(mut self, workflow: impl Into<String>, stages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let workflow = workflow.into();
        let stages: Vec<String> = stages.into_iter().map(Into::into).collect();
        if stages.is_empty() {
            self.errors
                .push(format!("workflow {workflow} has no stages"));
            return self;
        }
        if self.map.contains_key(&workflow) {
            self.errors
                .push(format!("duplicate workflow registration: {workflow}"));
            return self;
        }
        self.map.insert(workflow, stages);
        self
    }

    pub fn build(self) -> StageCatalog {
        self.build_result().expect("invalid stage catalog")
    }

    pub fn build_result(self) -> Result<StageCatalog, WorkflowError> {
        if self.errors.is_empty() {
            Ok(StageCatalog {
                inner: Arc::new(self.map),
            })
        } else {
            Err(WorkflowError::MalformedInput(self.errors.join("; ")))
        }
    }
}
