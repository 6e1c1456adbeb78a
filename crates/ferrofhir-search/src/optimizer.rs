//! Post-generation SQL text optimization passes.
//!
//! The generator expands conservatively: iterative includes get one CTE
//! per include step per distinct predecessor, and every range bound in the
//! source expression becomes its own comparison. These passes reduce the
//! generated text before execution. Both are strictly optional: on any
//! unexpected shape they log a warning and return the input unchanged —
//! correctness never depends on them, only plan size and cost do.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, warn};

use crate::expression::{BinaryOperator, SearchValue};
use crate::param_hasher::HashingParameterManager;
use crate::sql_generator::{IncludeCteSpec, format_include_cte};

/// Tautology substituted for comparisons proven redundant.
const TAUTOLOGY: &str = "1 = 1";

static CTE_LINE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^,(cte\d+) AS \(.+\) /\* (include|iterate):(fwd|rev):(\d+):(\d+):(\d+|-):((?:cte\d+)(?:,cte\d+)*) \*/$",
    )
    .expect("Invalid include CTE regex")
});

static INCLUDED_LINE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^,included AS \(SELECT t, sid FROM (cte\d+)((?: UNION SELECT t, sid FROM cte\d+)*)\)$")
        .expect("Invalid included union regex")
});

static CTE_NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"cte\d+").expect("Invalid CTE name regex"));

static COMPARISON_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"([A-Za-z_][A-Za-z0-9_.]*)\s(>=|<=|>|<)\s\$(\d+)").expect("Invalid comparison regex")
});

// ============================================================================
// Duplicate iterative-include collapsing
// ============================================================================

/// One parsed include CTE line.
struct CteEntry {
    line_index: usize,
    name: String,
    spec: IncludeCteSpec,
}

/// Collapse duplicate iterative-include CTEs.
///
/// Iterate CTEs sharing a (search-parameter, source-type) key but reading
/// from different source CTEs are collapsed: a source set already covered
/// by the survivor is dropped outright, otherwise the sources are merged
/// into one `EXISTS (… UNION SELECT …)` reference check and the merged
/// CTE removed. The trailing union of included keys is fixed up to match.
pub fn collapse_duplicate_include_ctes(sql: &str) -> String {
    if !sql.contains("/* iterate:") {
        return sql.to_string();
    }
    match try_collapse(sql) {
        Some(optimized) => optimized,
        None => {
            warn!("Include CTE collapsing pass did not recognize the query shape; using original text");
            sql.to_string()
        }
    }
}

fn try_collapse(sql: &str) -> Option<String> {
    let lines: Vec<&str> = sql.lines().collect();
    let mut entries: Vec<CteEntry> = Vec::new();
    let mut included_line: Option<usize> = None;

    for (line_index, line) in lines.iter().enumerate() {
        if let Some(entry) = parse_cte_line(line_index, line) {
            entries.push(entry);
        } else if line.contains("/* iterate:") || line.contains("/* include:") {
            // a marker we failed to parse means the shape changed under us
            return None;
        } else if INCLUDED_LINE_RE.is_match(line) {
            included_line = Some(line_index);
        }
    }
    let included_line = included_line?;

    // Group iterate CTEs by key; non-iterating includes are never merged.
    let mut groups: HashMap<(bool, i16, i16, Option<i16>), Vec<usize>> = HashMap::new();
    for (i, entry) in entries.iter().enumerate() {
        if entry.spec.iterate {
            groups.entry(entry.spec.key()).or_default().push(i);
        }
    }

    // removed name -> surviving name
    let mut removed: HashMap<String, String> = HashMap::new();
    let mut merged_sources: HashMap<usize, Vec<String>> = HashMap::new();
    let mut dropped_count = 0usize;
    let mut merged_count = 0usize;

    for indices in groups.values() {
        if indices.len() < 2 {
            continue;
        }
        let survivor = indices[0];
        let mut sources = entries[survivor].spec.sources.clone();
        for &other in &indices[1..] {
            let other_sources = &entries[other].spec.sources;
            if other_sources.iter().all(|s| sources.contains(s)) {
                // the survivor's union already covers this one
                dropped_count += 1;
            } else {
                for source in other_sources {
                    if !sources.contains(source) {
                        sources.push(source.clone());
                    }
                }
                merged_count += 1;
            }
            removed.insert(entries[other].name.clone(), entries[survivor].name.clone());
        }
        sort_by_cte_number(&mut sources);
        merged_sources.insert(survivor, sources);
    }

    if removed.is_empty() {
        return Some(sql.to_string());
    }

    // Rebuild: drop removed lines, re-emit survivors with merged sources,
    // remap sources that pointed at a removed CTE.
    let mut output: Vec<Option<String>> = lines.iter().map(|l| Some((*l).to_string())).collect();
    for (i, entry) in entries.iter().enumerate() {
        if removed.contains_key(&entry.name) {
            output[entry.line_index] = None;
            continue;
        }
        let mut spec = entry.spec.clone();
        if let Some(sources) = merged_sources.get(&i) {
            spec.sources = sources.clone();
        }
        let mut remapped: Vec<String> = Vec::new();
        for source in &spec.sources {
            let target = removed.get(source).cloned().unwrap_or_else(|| source.clone());
            if !remapped.contains(&target) {
                remapped.push(target);
            }
        }
        sort_by_cte_number(&mut remapped);
        spec.sources = remapped;
        output[entry.line_index] = Some(format_include_cte(&entry.name, &spec));
    }
    output[included_line] = Some(rebuild_included_line(lines[included_line], &removed)?);

    debug!(
        dropped = dropped_count,
        merged = merged_count,
        "Collapsed duplicate iterative-include CTEs"
    );
    Some(
        output
            .into_iter()
            .flatten()
            .collect::<Vec<_>>()
            .join("\n"),
    )
}

fn parse_cte_line(line_index: usize, line: &str) -> Option<CteEntry> {
    let caps = CTE_LINE_RE.captures(line)?;
    let target = match &caps[6] {
        "-" => None,
        value => Some(value.parse::<i16>().ok()?),
    };
    Some(CteEntry {
        line_index,
        name: caps[1].to_string(),
        spec: IncludeCteSpec {
            iterate: &caps[2] == "iterate",
            reversed: &caps[3] == "rev",
            param_id: caps[4].parse().ok()?,
            source_type_id: caps[5].parse().ok()?,
            target_type_id: target,
            sources: caps[7].split(',').map(str::to_string).collect(),
        },
    })
}

fn rebuild_included_line(line: &str, removed: &HashMap<String, String>) -> Option<String> {
    let caps = INCLUDED_LINE_RE.captures(line)?;
    let mut names: Vec<String> = Vec::new();
    let full = format!("{}{}", &caps[1], &caps[2]);
    for name in CTE_NAME_RE.find_iter(&full) {
        let target = removed
            .get(name.as_str())
            .cloned()
            .unwrap_or_else(|| name.as_str().to_string());
        if !names.contains(&target) {
            names.push(target);
        }
    }
    sort_by_cte_number(&mut names);
    let union = names
        .iter()
        .map(|name| format!("SELECT t, sid FROM {name}"))
        .collect::<Vec<_>>()
        .join(" UNION ");
    Some(format!(",included AS ({union})"))
}

fn sort_by_cte_number(names: &mut [String]) {
    names.sort_by_key(|name| {
        name.strip_prefix("cte")
            .and_then(|n| n.parse::<usize>().ok())
            .unwrap_or(usize::MAX)
    });
}

// ============================================================================
// Redundant comparison removal
// ============================================================================

/// Remove comparisons made redundant by a tighter bound on the same column.
///
/// Applies only when the query has no CTEs and no top-level `OR`; with
/// either present the reduction is unsound and the pass declines. Within
/// each (column, direction) group the single tightest bound is kept (the
/// maximum literal for `>`/`>=`, minimum for `<`/`<=`, strict operator
/// preferred on ties) and every other comparison becomes a tautology.
pub fn remove_redundant_comparisons(sql: &str, params: &HashingParameterManager) -> String {
    if sql.trim_start().starts_with("WITH ") || has_top_level_or(sql) {
        return sql.to_string();
    }
    match try_remove_redundant(sql, params) {
        Some(optimized) => optimized,
        None => {
            warn!("Comparison reduction pass did not recognize the query shape; using original text");
            sql.to_string()
        }
    }
}

fn has_top_level_or(sql: &str) -> bool {
    let mut depth = 0i32;
    for (i, b) in sql.bytes().enumerate() {
        match b {
            b'(' => depth += 1,
            b')' => depth -= 1,
            b' ' if depth == 0 && sql[i..].starts_with(" OR ") => return true,
            _ => {}
        }
    }
    false
}

struct Comparison {
    start: usize,
    end: usize,
    column: String,
    op: BinaryOperator,
    value: SearchValue,
}

fn try_remove_redundant(sql: &str, params: &HashingParameterManager) -> Option<String> {
    let mut comparisons: Vec<Comparison> = Vec::new();
    for caps in COMPARISON_RE.captures_iter(sql) {
        let whole = caps.get(0)?;
        let op = match &caps[2] {
            ">" => BinaryOperator::GreaterThan,
            ">=" => BinaryOperator::GreaterThanOrEqual,
            "<" => BinaryOperator::LessThan,
            _ => BinaryOperator::LessThanOrEqual,
        };
        let placeholder: usize = caps[3].parse().ok()?;
        // a placeholder with no bound value means the text and the
        // parameter set disagree; leave the query alone
        let value = params.value(placeholder)?.clone();
        comparisons.push(Comparison {
            start: whole.start(),
            end: whole.end(),
            column: caps[1].to_string(),
            op,
            value,
        });
    }
    if comparisons.len() < 2 {
        return Some(sql.to_string());
    }

    let mut groups: HashMap<(String, bool), Vec<usize>> = HashMap::new();
    for (i, cmp) in comparisons.iter().enumerate() {
        groups
            .entry((cmp.column.clone(), cmp.op.is_lower_bound()))
            .or_default()
            .push(i);
    }

    let mut redundant: Vec<usize> = Vec::new();
    for ((_, lower_bound), indices) in &groups {
        if indices.len() < 2 {
            continue;
        }
        let mut keeper = indices[0];
        for &candidate in &indices[1..] {
            let ordering = comparisons[candidate]
                .value
                .partial_cmp_same_type(&comparisons[keeper].value)?;
            let tighter = if *lower_bound {
                ordering.is_gt()
            } else {
                ordering.is_lt()
            };
            let strict_on_tie = ordering.is_eq()
                && matches!(
                    comparisons[candidate].op,
                    BinaryOperator::GreaterThan | BinaryOperator::LessThan
                )
                && matches!(
                    comparisons[keeper].op,
                    BinaryOperator::GreaterThanOrEqual | BinaryOperator::LessThanOrEqual
                );
            if tighter || strict_on_tie {
                keeper = candidate;
            }
        }
        redundant.extend(indices.iter().copied().filter(|&i| i != keeper));
    }
    if redundant.is_empty() {
        return Some(sql.to_string());
    }
    redundant.sort_unstable();

    let mut result = String::with_capacity(sql.len());
    let mut cursor = 0usize;
    for &i in &redundant {
        let cmp = &comparisons[i];
        result.push_str(&sql[cursor..cmp.start]);
        result.push_str(TAUTOLOGY);
        cursor = cmp.end;
    }
    result.push_str(&sql[cursor..]);

    debug!(removed = redundant.len(), "Removed redundant comparisons");
    Some(result)
}
