//! Immutable agent catalog snapshots.

use std::collections::{BTreeMap, BTreeSet};

use atelier_core::{AgentDescriptor, AgentId, OrchestratorError};

use crate::source::{AgentDefinition, Revision};

/// A validated, immutable snapshot of all known agents.
///
/// Built by the loader and swapped wholesale behind an `Arc`; readers
/// never observe a partially applied catalog.
#[derive(Debug, Clone, PartialEq)]
pub struct Catalog {
    revision: Revision,
    agents: BTreeMap<AgentId, AgentDescriptor>,
}

impl Catalog {
    /// Validate a definition batch and build a catalog.
    ///
    /// All-or-nothing: the first invalid definition fails the whole build
    /// with a `ConfigValidation` error naming the descriptor and field.
    pub fn build(
        definitions: Vec<AgentDefinition>,
        revision: Revision,
    ) -> Result<Self, OrchestratorError> {
        let mut agents = BTreeMap::new();

        for def in definitions {
            validate(&def)?;

            let id = AgentId::new(def.id.clone());
            let descriptor = AgentDescriptor {
                id: id.clone(),
                display_name: def.display_name,
                kind: def.kind,
                capabilities: def.capabilities.into_iter().collect(),
                max_concurrency: def.max_concurrency,
                status: def.status,
                run_count: 0,
                last_run_at: None,
            };

            if agents.insert(id, descriptor).is_some() {
                return Err(OrchestratorError::ConfigValidation {
                    subject: def.id,
                    field: "id",
                    reason: "duplicate agent id".into(),
                });
            }
        }

        Ok(Self { revision, agents })
    }

    /// The source revision this snapshot was built from.
    pub fn revision(&self) -> &Revision {
        &self.revision
    }

    /// Look up one agent.
    pub fn get(&self, id: &AgentId) -> Option<&AgentDescriptor> {
        self.agents.get(id)
    }

    /// Iterate all agents in id order.
    pub fn agents(&self) -> impl Iterator<Item = &AgentDescriptor> {
        self.agents.values()
    }

    /// Number of agents in the snapshot.
    pub fn len(&self) -> usize {
        self.agents.len()
    }

    /// Whether the snapshot is empty.
    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    /// Routable agents whose capabilities cover the required set, in id order.
    pub fn candidates<'a>(
        &'a self,
        required: &'a BTreeSet<String>,
    ) -> impl Iterator<Item = &'a AgentDescriptor> {
        self.agents
            .values()
            .filter(|agent| agent.status.is_routable() && agent.covers(required))
    }
}

fn validate(def: &AgentDefinition) -> Result<(), OrchestratorError> {
    if def.id.trim().is_empty() {
        return Err(OrchestratorError::ConfigValidation {
            subject: def.id.clone(),
            field: "id",
            reason: "id must not be empty".into(),
        });
    }
    if def.capabilities.is_empty() {
        return Err(OrchestratorError::ConfigValidation {
            subject: def.id.clone(),
            field: "capabilities",
            reason: "at least one capability is required".into(),
        });
    }
    if def.max_concurrency == 0 {
        return Err(OrchestratorError::ConfigValidation {
            subject: def.id.clone(),
            field: "max_concurrency",
            reason: "must be >= 1".into(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use atelier_core::{AgentKind, AgentStatus};

    fn definition(id: &str, capabilities: &[&str]) -> AgentDefinition {
        AgentDefinition {
            id: id.into(),
            display_name: String::new(),
            kind: AgentKind::Specialized,
            capabilities: capabilities.iter().map(|c| c.to_string()).collect(),
            max_concurrency: 1,
            status: AgentStatus::Idle,
        }
    }

    #[test]
    fn test_build_rejects_empty_id() {
        let err = Catalog::build(vec![definition("", &["copy"])], Revision::new("1")).unwrap_err();
        assert!(matches!(
            err,
            OrchestratorError::ConfigValidation { field: "id", .. }
        ));
    }

    #[test]
    fn test_build_rejects_empty_capabilities() {
        let err = Catalog::build(vec![definition("a1", &[])], Revision::new("1")).unwrap_err();
        assert!(matches!(
            err,
            OrchestratorError::ConfigValidation {
                field: "capabilities",
                ..
            }
        ));
    }

    #[test]
    fn test_build_rejects_zero_concurrency() {
        let mut def = definition("a1", &["copy"]);
        def.max_concurrency = 0;
        let err = Catalog::build(vec![def], Revision::new("1")).unwrap_err();
        assert!(matches!(
            err,
            OrchestratorError::ConfigValidation {
                field: "max_concurrency",
                ..
            }
        ));
    }

    #[test]
    fn test_build_rejects_duplicate_ids() {
        let err = Catalog::build(
            vec![definition("a1", &["copy"]), definition("a1", &["seo"])],
            Revision::new("1"),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            OrchestratorError::ConfigValidation { field: "id", .. }
        ));
    }

    #[test]
    fn test_candidates_filter_offline_and_coverage() {
        let mut offline = definition("a1", &["copy"]);
        offline.status = AgentStatus::Offline;
        let catalog = Catalog::build(
            vec![
                offline,
                definition("a2", &["copy", "seo"]),
                definition("a3", &["3d_model"]),
            ],
            Revision::new("1"),
        )
        .unwrap();

        let required: BTreeSet<String> = ["copy".to_string()].into();
        let ids: Vec<_> = catalog
            .candidates(&required)
            .map(|a| a.id.as_str().to_owned())
            .collect();
        assert_eq!(ids, vec!["a2"]);
    }
}
