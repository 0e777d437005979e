//! Textual plan rendering, one line per operator.
//!
//! Backs the `Explain` operator and debug logging. Entity names are resolved
//! through the accessor so the output shows labels and properties the way the
//! user wrote them.

use crate::query::plan::physical::LogicalOperator;
use crate::storage::GraphAccessor;

pub fn render_plan(root: &LogicalOperator, accessor: &GraphAccessor) -> Vec<String> {
    let mut lines = Vec::new();
    render(root, accessor, 0, &mut lines);
    lines
}

fn render(op: &LogicalOperator, accessor: &GraphAccessor, depth: usize, lines: &mut Vec<String>) {
    let indent = " ".repeat(depth * 2);
    let details = describe(op, accessor);
    if details.is_empty() {
        lines.push(format!("{indent}* {}", op.name()));
    } else {
        lines.push(format!("{indent}* {} {details}", op.name()));
    }
    match op {
        LogicalOperator::Merge {
            input,
            merge_match,
            merge_create,
        } => {
            render(input, accessor, depth + 1, lines);
            render(merge_match, accessor, depth + 1, lines);
            render(merge_create, accessor, depth + 1, lines);
        }
        LogicalOperator::Optional {
            input, optional, ..
        } => {
            render(input, accessor, depth + 1, lines);
            render(optional, accessor, depth + 1, lines);
        }
        LogicalOperator::Cartesian { left, right, .. } => {
            render(left, accessor, depth + 1, lines);
            render(right, accessor, depth + 1, lines);
        }
        _ => {
            if let Some(input) = op.input() {
                render(input, accessor, depth + 1, lines);
            }
        }
    }
}

fn describe(op: &LogicalOperator, accessor: &GraphAccessor) -> String {
    match op {
        LogicalOperator::ScanAll { output, .. } => format!("({})", output.name),
        LogicalOperator::ScanAllByLabel { output, label, .. } => {
            format!("({} :{})", output.name, accessor.label_name(*label))
        }
        LogicalOperator::ScanAllByLabelPropertyValue {
            output,
            label,
            property,
            ..
        }
        | LogicalOperator::ScanAllByLabelPropertyRange {
            output,
            label,
            property,
            ..
        } => format!(
            "({} :{} {{{}}})",
            output.name,
            accessor.label_name(*label),
            accessor.property_name(*property)
        ),
        LogicalOperator::Expand {
            input_symbol,
            edge_symbol,
            output,
            ..
        } => format!(
            "({})-[{}]-({})",
            input_symbol.name, edge_symbol.name, output.name
        ),
        LogicalOperator::ExpandVariable {
            input_symbol,
            edge_symbol,
            output,
            ..
        } => format!(
            "({})-[{} *]-({})",
            input_symbol.name, edge_symbol.name, output.name
        ),
        LogicalOperator::ExpandBfs {
            input_symbol,
            output,
            ..
        } => format!("({})-[*bfs]-({})", input_symbol.name, output.name),
        LogicalOperator::Produce { named_exprs, .. } => {
            let names: Vec<&str> = named_exprs
                .iter()
                .map(|(symbol, _)| symbol.name.as_str())
                .collect();
            format!("{{{}}}", names.join(", "))
        }
        LogicalOperator::Aggregate {
            aggregations,
            remember,
            ..
        } => {
            let outputs: Vec<&str> = aggregations
                .iter()
                .map(|a| a.output_symbol.name.as_str())
                .collect();
            let kept: Vec<&str> = remember.iter().map(|s| s.name.as_str()).collect();
            format!("{{{}}} {{{}}}", outputs.join(", "), kept.join(", "))
        }
        LogicalOperator::OrderBy { keys, .. } => format!("{{{} keys}}", keys.len()),
        LogicalOperator::Distinct { symbols, .. } => {
            let names: Vec<&str> = symbols.iter().map(|s| s.name.as_str()).collect();
            format!("{{{}}}", names.join(", "))
        }
        LogicalOperator::ConstructNamedPath { path_symbol, .. } => {
            format!("({})", path_symbol.name)
        }
        LogicalOperator::CreateIndex { label, property } => format!(
            ":{}({})",
            accessor.label_name(*label),
            accessor.property_name(*property)
        ),
        _ => String::new(),
    }
}
