//! Destination node selection

use k8s_openapi::api::core::v1::Node;
use rand::seq::SliceRandom;
use rand::Rng;

use crate::error::{Error, ObjectKind, Result};

/// Where a relocated pod should land
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Placement {
    /// Leave the node empty and let the target scheduler decide
    #[default]
    Scheduler,
    /// Any node of the inventory, uniformly at random
    Random,
    /// This exact node
    Node(String),
}

impl Placement {
    /// `Node(name)` when a name is given, otherwise `fallback`
    pub fn node_or(name: Option<String>, fallback: Placement) -> Self {
        match name.filter(|n| !n.is_empty()) {
            Some(name) => Placement::Node(name),
            None => fallback,
        }
    }

    /// Whether selecting needs the node inventory
    pub fn needs_inventory(&self) -> bool {
        !matches!(self, Placement::Scheduler)
    }

    /// Pick the destination node, `None` meaning "unpinned".
    ///
    /// A named node must be part of `inventory`. Random selection over an
    /// empty inventory fails with [`Error::EmptyInventory`].
    pub fn select<R: Rng + ?Sized>(&self, inventory: &[String], rng: &mut R) -> Result<Option<String>> {
        match self {
            Placement::Scheduler => Ok(None),
            Placement::Random => inventory
                .choose(rng)
                .cloned()
                .map(Some)
                .ok_or(Error::EmptyInventory),
            Placement::Node(name) => {
                if inventory.iter().any(|n| n == name) {
                    Ok(Some(name.clone()))
                } else {
                    Err(Error::NotFound {
                        kind: ObjectKind::Node,
                        namespace: String::new(),
                        name: name.clone(),
                    })
                }
            }
        }
    }
}

/// Names of the nodes that accept new pods. Cordoned nodes are left out.
pub fn schedulable_names(nodes: &[Node]) -> Vec<String> {
    nodes
        .iter()
        .filter(|n| {
            !n.spec
                .as_ref()
                .and_then(|s| s.unschedulable)
                .unwrap_or(false)
        })
        .filter_map(|n| n.metadata.name.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::NodeSpec;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn nodes(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn create_test_node(name: &str, unschedulable: bool) -> Node {
        Node {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            spec: Some(NodeSpec {
                unschedulable: Some(unschedulable),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn test_single_node_inventory() {
        let mut rng = StdRng::seed_from_u64(7);
        let inventory = nodes(&["only"]);
        for _ in 0..10 {
            let picked = Placement::Random.select(&inventory, &mut rng).unwrap();
            assert_eq!(picked.as_deref(), Some("only"));
        }
    }

    #[test]
    fn test_empty_inventory() {
        let mut rng = StdRng::seed_from_u64(7);
        let err = Placement::Random.select(&[], &mut rng).unwrap_err();
        assert!(matches!(err, Error::EmptyInventory));
    }

    #[test]
    fn test_random_is_reproducible_with_seed() {
        let inventory = nodes(&["a", "b", "c", "d", "e"]);
        let mut first = StdRng::seed_from_u64(42);
        let mut second = StdRng::seed_from_u64(42);

        let a: Vec<_> = (0..8)
            .map(|_| Placement::Random.select(&inventory, &mut first).unwrap())
            .collect();
        let b: Vec<_> = (0..8)
            .map(|_| Placement::Random.select(&inventory, &mut second).unwrap())
            .collect();
        assert_eq!(a, b);
        assert!(a.iter().all(|n| inventory.contains(n.as_ref().unwrap())));
    }

    #[test]
    fn test_scheduler_placement_pins_nothing() {
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(Placement::Scheduler.select(&[], &mut rng).unwrap(), None);
        assert!(!Placement::Scheduler.needs_inventory());
    }

    #[test]
    fn test_named_node_must_exist() {
        let mut rng = StdRng::seed_from_u64(1);
        let inventory = nodes(&["node-1", "node-7"]);

        let picked = Placement::Node("node-7".to_string())
            .select(&inventory, &mut rng)
            .unwrap();
        assert_eq!(picked.as_deref(), Some("node-7"));

        let err = Placement::Node("node-9".to_string())
            .select(&inventory, &mut rng)
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_node_or() {
        assert_eq!(
            Placement::node_or(Some("n1".to_string()), Placement::Random),
            Placement::Node("n1".to_string())
        );
        assert_eq!(
            Placement::node_or(Some(String::new()), Placement::Random),
            Placement::Random
        );
        assert_eq!(Placement::node_or(None, Placement::Scheduler), Placement::Scheduler);
    }

    #[test]
    fn test_schedulable_names_skip_cordoned() {
        let inventory = vec![
            create_test_node("node-1", false),
            create_test_node("node-2", true),
            create_test_node("node-3", false),
        ];
        assert_eq!(schedulable_names(&inventory), nodes(&["node-1", "node-3"]));
    }
}
