//! Parameter grouping for the loss plot.
//!
//! Up to 15 parameters each keep their own name. Beyond that a parameter
//! belongs to the first configured group listing it, otherwise to the prefix
//! of its name before the first `_`. Automatic groups with a single member
//! are merged into `other`.

use std::collections::BTreeMap;

use clap::Args;
use plotters::style::{RGBColor, BLACK};
use tracing::warn;

use crate::plots::colors::{sample_listed, TAB10, TAB20};
use crate::plots::loss::LegendEntry;

const MAX_UNGROUPED: usize = 15;
const LEGEND_WRAP: usize = 50;

#[derive(Clone, Debug, PartialEq)]
pub struct ParameterGrouping {
    /// Plotting order as indices into the parameter list.
    pub sort_order: Vec<usize>,
    /// Group of each parameter, in plotting order.
    pub groups: Vec<String>,
    /// Bar colour of each parameter, in plotting order.
    pub colors: Vec<RGBColor>,
    /// Group name and x position of its label.
    pub xticks: Vec<(String, f64)>,
    pub legend: Vec<LegendEntry>,
}

fn prefix_group(name: &str) -> String {
    name.split('_').next().unwrap_or(name).to_string()
}

fn assign_groups(names: &[String], configured: &BTreeMap<String, Vec<String>>) -> Vec<String> {
    if names.len() <= MAX_UNGROUPED {
        return names.to_vec();
    }
    let groups: Vec<String> = names
        .iter()
        .map(|name| {
            configured
                .iter()
                .find(|(_, members)| members.contains(name))
                .map(|(group, _)| group.clone())
                .unwrap_or_else(|| prefix_group(name))
        })
        .collect();

    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for g in &groups {
        *counts.entry(g.as_str()).or_default() += 1;
    }
    groups
        .iter()
        .map(|g| {
            if counts[g.as_str()] > 1 || configured.contains_key(g) {
                g.clone()
            } else {
                "other".to_string()
            }
        })
        .collect()
}

fn legend_label(group: &str, members: &[&str]) -> String {
    let mut label = format!("{group}: ");
    let mut length = label.len();
    for name in members {
        label.push_str(name);
        label.push_str(", ");
        length += name.len() + 2;
        if length > LEGEND_WRAP {
            label.push('\n');
            length = 0;
        }
    }
    label
        .trim_end_matches(|c: char| matches!(c, ',' | ' ' | '\n'))
        .to_string()
}

impl ParameterGrouping {
    /// `names` are the model output variables ordered by position.
    pub fn new(names: &[String], configured: &BTreeMap<String, Vec<String>>) -> Self {
        let groups = assign_groups(names, configured);

        let mut sort_order: Vec<usize> = (0..names.len()).collect();
        if names.len() > MAX_UNGROUPED {
            sort_order.sort_by(|a, b| groups[*a].cmp(&groups[*b]));
        }
        let sorted_names: Vec<&str> = sort_order.iter().map(|i| names[*i].as_str()).collect();
        let sorted_groups: Vec<String> = sort_order.iter().map(|i| groups[*i].clone()).collect();

        let mut members: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
        for (group, name) in sorted_groups.iter().zip(&sorted_names) {
            members.entry(group.as_str()).or_default().push(*name);
        }

        let n_groups = members.len();
        if n_groups > 20 {
            warn!("More than 20 groups detected, but colormap has only 20 colors.");
        }
        let all_singletons = members.values().all(|m| m.len() == 1);
        let group_colors: BTreeMap<&str, RGBColor> = if all_singletons {
            members.keys().map(|g| (*g, BLACK)).collect()
        } else {
            let palette: &[RGBColor] = if n_groups <= 10 { &TAB10 } else { &TAB20 };
            members
                .keys()
                .copied()
                .zip(sample_listed(palette, n_groups))
                .collect()
        };

        let colors = sorted_groups
            .iter()
            .map(|g| group_colors[g.as_str()])
            .collect();

        let mut xticks = Vec::new();
        let mut start = 0usize;
        for (i, group) in sorted_groups.iter().enumerate() {
            let last = i + 1 == sorted_groups.len() || sorted_groups[i + 1] != *group;
            if last {
                let count = (i + 1 - start) as f64;
                xticks.push((group.clone(), (i + 1) as f64 - count / 2.0 - 0.5));
                start = i + 1;
            }
        }

        let legend = members
            .iter()
            .map(|(group, names)| LegendEntry {
                label: legend_label(group, names),
                color: group_colors[group],
            })
            .collect();

        Self {
            sort_order,
            groups: sorted_groups,
            colors,
            xticks,
            legend,
        }
    }

    /// Reorder per-parameter values into plotting order.
    pub fn apply<T: Copy>(&self, values: &[T]) -> Vec<T> {
        self.sort_order.iter().map(|i| values[*i]).collect()
    }
}

#[derive(Args, Debug, Clone)]
pub struct GroupsArgs {
    /// Parameter names in model output order.
    #[arg(required = true)]
    pub names: Vec<String>,

    /// Explicit group, e.g. `--group surface=2t,10u,10v`.
    #[arg(long = "group")]
    pub groups: Vec<String>,
}

/// `groups` subcommand: show how parameters would be grouped in the loss plot.
pub fn run(args: GroupsArgs) -> anyhow::Result<()> {
    let mut configured = BTreeMap::new();
    for entry in &args.groups {
        let (group, members) = entry
            .split_once('=')
            .ok_or_else(|| anyhow::anyhow!("group '{entry}' must look like name=a,b,c"))?;
        configured.insert(
            group.to_string(),
            members.split(',').map(|m| m.trim().to_string()).collect(),
        );
    }
    let grouping = ParameterGrouping::new(&args.names, &configured);
    for (i, idx) in grouping.sort_order.iter().enumerate() {
        let c = grouping.colors[i];
        println!(
            "{:>3}  {:<16} {:<12} #{:02x}{:02x}{:02x}",
            i, args.names[*idx], grouping.groups[i], c.0, c.1, c.2
        );
    }
    for entry in &grouping.legend {
        println!("{}", entry.label);
    }
    Ok(())
}
