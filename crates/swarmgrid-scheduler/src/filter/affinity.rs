//! Affinities to other containers: `container==name` or `image==name`.

use swarmgrid_cluster::NodeView;
use swarmgrid_state::ContainerConfig;

use super::Filter;
use super::expr::Expr;
use crate::error::FilterError;

#[derive(Debug, Default)]
pub struct AffinityFilter;

fn parse_affinity(input: &str) -> Result<Expr, FilterError> {
    let expr = Expr::parse(input)?;
    if expr.key.eq_ignore_ascii_case("container") || expr.key.eq_ignore_ascii_case("image") {
        Ok(expr)
    } else {
        Err(FilterError::InvalidExpression {
            expr: input.to_string(),
            reason: "affinity key must be container or image".to_string(),
        })
    }
}

fn node_values<'a>(expr: &Expr, node: &'a NodeView) -> Vec<&'a str> {
    if expr.key.eq_ignore_ascii_case("image") {
        return node.containers.iter().map(|c| c.config.image.as_str()).collect();
    }
    node.containers
        .iter()
        .flat_map(|c| [c.id.as_str(), c.name.as_str()])
        .filter(|v| !v.is_empty())
        .collect()
}

impl Filter for AffinityFilter {
    fn name(&self) -> &'static str {
        "affinity"
    }

    fn filter(
        &self,
        config: &ContainerConfig,
        nodes: Vec<NodeView>,
    ) -> Result<Vec<NodeView>, FilterError> {
        let exprs = config
            .affinities
            .iter()
            .map(|a| parse_affinity(a))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(nodes
            .into_iter()
            .filter(|node| exprs.iter().all(|e| e.accepts(node_values(e, node))))
            .collect())
    }
}
