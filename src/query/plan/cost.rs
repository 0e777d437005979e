//! Scalar cost model over the operator tree.
//!
//! Cost is expected rows times a per-operator row weight, folded bottom-up.
//! Cardinalities come from the accessor's approximate counts; everything else
//! is a fixed factor. The absolute numbers are meaningless, only candidate
//! ordering matters.

use crate::query::plan::physical::LogicalOperator;
use crate::storage::GraphAccessor;

mod weight {
    pub const SCAN_ALL: f64 = 1.0;
    pub const SCAN_BY_LABEL: f64 = 1.1;
    pub const SCAN_BY_INDEX: f64 = 1.1;
    pub const EXPAND: f64 = 2.0;
    pub const EXPAND_VARIABLE: f64 = 9.0;
    pub const FILTER: f64 = 0.2;
    pub const PRODUCE: f64 = 0.1;
    pub const WRITE: f64 = 2.0;
    pub const SORT: f64 = 2.0;
    pub const UNIT: f64 = 1.0;
}

mod selectivity {
    pub const FILTER: f64 = 0.25;
    pub const INDEX_POINT: f64 = 0.1;
    pub const INDEX_RANGE: f64 = 0.25;
    pub const EDGE_UNIQUENESS: f64 = 0.95;
    pub const GATE: f64 = 0.5;
}

struct Estimate {
    cardinality: f64,
    cost: f64,
}

pub struct CostEstimator<'a> {
    accessor: &'a GraphAccessor,
}

impl<'a> CostEstimator<'a> {
    pub fn new(accessor: &'a GraphAccessor) -> Self {
        Self { accessor }
    }

    pub fn cost(&self, root: &LogicalOperator) -> f64 {
        self.estimate(root).cost
    }

    fn avg_degree(&self) -> f64 {
        let vertices = self.accessor.vertices_count().max(1) as f64;
        (self.accessor.edges_count() as f64 / vertices).max(1.0)
    }

    fn estimate(&self, op: &LogicalOperator) -> Estimate {
        let input = op.input().map(|i| self.estimate(i)).unwrap_or(Estimate {
            cardinality: 1.0,
            cost: 0.0,
        });
        match op {
            LogicalOperator::Once => Estimate {
                cardinality: 1.0,
                cost: 0.0,
            },
            LogicalOperator::ScanAll { .. } => {
                self.scan(input, self.accessor.vertices_count() as f64, weight::SCAN_ALL)
            }
            LogicalOperator::ScanAllByLabel { label, .. } => self.scan(
                input,
                self.accessor.vertices_count_by_label(*label) as f64,
                weight::SCAN_BY_LABEL,
            ),
            LogicalOperator::ScanAllByLabelPropertyValue { label, .. } => {
                let labeled = self.accessor.vertices_count_by_label(*label) as f64;
                self.scan(input, labeled * selectivity::INDEX_POINT, weight::SCAN_BY_INDEX)
            }
            LogicalOperator::ScanAllByLabelPropertyRange { label, .. } => {
                let labeled = self.accessor.vertices_count_by_label(*label) as f64;
                self.scan(input, labeled * selectivity::INDEX_RANGE, weight::SCAN_BY_INDEX)
            }
            LogicalOperator::Expand { .. } => {
                let cardinality = input.cardinality * self.avg_degree();
                Estimate {
                    cost: input.cost + cardinality * weight::EXPAND,
                    cardinality,
                }
            }
            LogicalOperator::ExpandVariable { .. } | LogicalOperator::ExpandBfs { .. } => {
                let degree = self.avg_degree();
                let cardinality = input.cardinality * degree * degree;
                Estimate {
                    cost: input.cost + cardinality * weight::EXPAND_VARIABLE,
                    cardinality,
                }
            }
            LogicalOperator::Filter { .. } => Estimate {
                cost: input.cost + input.cardinality * weight::FILTER,
                cardinality: input.cardinality * selectivity::FILTER,
            },
            LogicalOperator::EdgeUniquenessFilter { .. } => Estimate {
                cost: input.cost + input.cardinality * weight::FILTER,
                cardinality: input.cardinality * selectivity::EDGE_UNIQUENESS,
            },
            LogicalOperator::Produce { named_exprs, .. } => Estimate {
                cost: input.cost
                    + input.cardinality * weight::PRODUCE * named_exprs.len().max(1) as f64,
                cardinality: input.cardinality,
            },
            LogicalOperator::ConstructNamedPath { .. } => Estimate {
                cost: input.cost + input.cardinality * weight::PRODUCE,
                cardinality: input.cardinality,
            },
            LogicalOperator::CreateNode { .. }
            | LogicalOperator::CreateExpand { .. }
            | LogicalOperator::SetProperty { .. }
            | LogicalOperator::SetProperties { .. }
            | LogicalOperator::SetLabels { .. }
            | LogicalOperator::RemoveProperty { .. }
            | LogicalOperator::RemoveLabels { .. }
            | LogicalOperator::Delete { .. } => Estimate {
                cost: input.cost + input.cardinality * weight::WRITE,
                cardinality: input.cardinality,
            },
            LogicalOperator::Accumulate { .. } | LogicalOperator::Distinct { .. } => Estimate {
                cost: input.cost + input.cardinality * weight::UNIT,
                cardinality: input.cardinality,
            },
            LogicalOperator::Aggregate { .. } => Estimate {
                cost: input.cost + input.cardinality * weight::UNIT,
                cardinality: (input.cardinality * selectivity::GATE).max(1.0),
            },
            LogicalOperator::Skip { .. } | LogicalOperator::Limit { .. } => Estimate {
                cost: input.cost,
                cardinality: input.cardinality * selectivity::GATE,
            },
            LogicalOperator::OrderBy { .. } => Estimate {
                cost: input.cost + input.cardinality * weight::SORT,
                cardinality: input.cardinality,
            },
            LogicalOperator::Unwind { .. } => Estimate {
                cost: input.cost + input.cardinality * weight::UNIT,
                cardinality: input.cardinality * 10.0,
            },
            LogicalOperator::Optional { optional, .. } => {
                let branch = self.estimate(optional);
                let cardinality = input.cardinality * branch.cardinality.max(1.0);
                Estimate {
                    cost: input.cost + input.cardinality * branch.cost.max(weight::UNIT),
                    cardinality,
                }
            }
            LogicalOperator::Merge {
                merge_match,
                merge_create,
                ..
            } => {
                let match_branch = self.estimate(merge_match);
                let create_branch = self.estimate(merge_create);
                Estimate {
                    cost: input.cost
                        + input.cardinality * (match_branch.cost + create_branch.cost).max(1.0),
                    cardinality: input.cardinality * match_branch.cardinality.max(1.0),
                }
            }
            LogicalOperator::Cartesian { left, right, .. } => {
                let left = self.estimate(left);
                let right = self.estimate(right);
                let cardinality = left.cardinality * right.cardinality;
                Estimate {
                    cost: left.cost + right.cost + cardinality * weight::UNIT,
                    cardinality,
                }
            }
            LogicalOperator::Explain { .. } => Estimate {
                cardinality: 1.0,
                cost: weight::UNIT,
            },
            // Administrative one-shots.
            _ => Estimate {
                cardinality: 0.0,
                cost: weight::UNIT,
            },
        }
    }

    fn scan(&self, input: Estimate, matches: f64, row_weight: f64) -> Estimate {
        let cardinality = input.cardinality * matches.max(1.0);
        Estimate {
            cost: input.cost + cardinality * row_weight,
            cardinality,
        }
    }
}
