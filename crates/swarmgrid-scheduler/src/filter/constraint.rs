//! Label constraints: `key==value` against node labels.
//!
//! The `node` key matches the node's name or address; every other key
//! matches the node label of the same name. A node without the label fails
//! `==` and passes `!=`.

use swarmgrid_cluster::NodeView;
use swarmgrid_state::ContainerConfig;

use super::Filter;
use super::expr::Expr;
use crate::error::FilterError;

#[derive(Debug, Default)]
pub struct ConstraintFilter;

fn node_values<'a>(expr: &Expr, node: &'a NodeView) -> Vec<&'a str> {
    if expr.key.eq_ignore_ascii_case("node") {
        return vec![node.name.as_str(), node.addr.as_str()];
    }
    node.labels
        .get(&expr.key)
        .map(|v| vec![v.as_str()])
        .unwrap_or_default()
}

impl Filter for ConstraintFilter {
    fn name(&self) -> &'static str {
        "constraint"
    }

    fn filter(
        &self,
        config: &ContainerConfig,
        nodes: Vec<NodeView>,
    ) -> Result<Vec<NodeView>, FilterError> {
        let exprs = config
            .constraints
            .iter()
            .map(|c| Expr::parse(c))
            .collect::<Result<Vec<_>, _>>()?;
        if exprs.is_empty() {
            return Ok(nodes);
        }

        Ok(nodes
            .into_iter()
            .filter(|node| exprs.iter().all(|e| e.accepts(node_values(e, node))))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::tests::node;

    fn run(constraints: &[&str], nodes: Vec<NodeView>) -> Vec<String> {
        let mut config = ContainerConfig::new("x");
        for c in constraints {
            config = config.with_constraint(c);
        }
        ConstraintFilter
            .filter(&config, nodes)
            .unwrap()
            .into_iter()
            .map(|n| n.id)
            .collect()
    }

    fn fleet() -> Vec<NodeView> {
        vec![
            node("10.0.0.1:2375", "db-1", &[("storage", "ssd"), ("zone", "a")]),
            node("10.0.0.2:2375", "web-1", &[("storage", "hdd"), ("zone", "a")]),
            node("10.0.0.3:2375", "web-2", &[("zone", "b")]),
        ]
    }

    #[test]
    fn matches_labels() {
        assert_eq!(run(&["storage==ssd"], fleet()), vec!["10.0.0.1:2375"]);
        assert_eq!(run(&["storage!=ssd"], fleet()), vec!["10.0.0.2:2375", "10.0.0.3:2375"]);
    }

    #[test]
    fn all_constraints_must_hold() {
        assert_eq!(run(&["zone==a", "storage==hdd"], fleet()), vec!["10.0.0.2:2375"]);
        assert!(run(&["zone==b", "storage==ssd"], fleet()).is_empty());
    }

    #[test]
    fn node_key_matches_name_or_address() {
        assert_eq!(run(&["node==web-*"], fleet()).len(), 2);
        assert_eq!(run(&["node==10.0.0.3:2375"], fleet()), vec!["10.0.0.3:2375"]);
        assert_eq!(run(&["node!=/^web-/"], fleet()), vec!["10.0.0.1:2375"]);
    }

    #[test]
    fn malformed_constraint_is_an_error() {
        let config = ContainerConfig::new("x").with_constraint("zone=a");
        assert!(ConstraintFilter.filter(&config, fleet()).is_err());
    }
}
