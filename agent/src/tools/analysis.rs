//! Code structure analysis, improvement suggestions and change tracking.

use super::source::{Statement, logical_lines, parse_statement};
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Classes with more methods than this get a split suggestion.
pub const MAX_METHODS_PER_CLASS: usize = 10;

/// Modules with more imports than this get an organisation suggestion.
pub const MAX_IMPORTS: usize = 15;

/// Modules with more functions than this get a split suggestion.
pub const MAX_FUNCTIONS: usize = 20;

/// A class and the methods defined directly in its body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassInfo {
    /// Class name
    pub name: String,
    /// Methods in definition order
    pub methods: Vec<String>,
    /// 1-based line of the `class` statement
    pub line_number: usize,
}

/// A function or method.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionInfo {
    /// Function name
    pub name: String,
    /// Positional parameter names
    pub args: Vec<String>,
    /// 1-based line of the `def` statement
    pub line_number: usize,
}

/// Size counters used for suggestions and deltas.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComplexityIndicators {
    /// Functions and methods
    pub num_functions: usize,
    /// Classes, nested ones included
    pub num_classes: usize,
    /// Physical lines
    pub lines_of_code: usize,
}

impl ComplexityIndicators {
    fn entries(self) -> [(&'static str, usize); 3] {
        [
            ("num_functions", self.num_functions),
            ("num_classes", self.num_classes),
            ("lines_of_code", self.lines_of_code),
        ]
    }
}

/// Kind of improvement suggested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuggestionKind {
    /// A class has too many methods
    ClassComplexity,
    /// A module has too many imports
    ImportOrganization,
    /// A module has too many functions
    ModuleComplexity,
}

/// One improvement suggestion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Suggestion {
    /// What kind of issue was found
    #[serde(rename = "type")]
    pub kind: SuggestionKind,
    /// Offending class, for class-level suggestions
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class_name: Option<String>,
    /// What to do
    pub suggestion: String,
    /// Why
    pub reason: String,
}

/// Structural differences between two analyses.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeChanges {
    /// Classes only in the current version
    pub added_classes: Vec<String>,
    /// Classes only in the previous version
    pub removed_classes: Vec<String>,
    /// Classes in both versions whose method lists differ
    pub modified_classes: Vec<String>,
    /// Functions only in the current version
    pub added_functions: Vec<String>,
    /// Functions only in the previous version
    pub removed_functions: Vec<String>,
    /// Current minus previous, per complexity indicator
    pub complexity_change: BTreeMap<String, i64>,
}

/// Result of [`analyze_code_structure`], enriched by the agent with changes
/// and suggestions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeAnalysis {
    /// Classes in source order
    pub classes: Vec<ClassInfo>,
    /// Functions and methods in source order
    pub functions: Vec<FunctionInfo>,
    /// Imported names
    pub imports: Vec<String>,
    /// Size counters
    pub complexity_indicators: ComplexityIndicators,
    /// Differences from the previous analysis, when there was one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub changes: Option<CodeChanges>,
    /// Improvement suggestions
    #[serde(default)]
    pub suggestions: Vec<Suggestion>,
}

enum Scope {
    Class(usize),
    Function,
}

/// Scan Python `code` for classes, functions and imports.
///
/// # Errors
///
/// Returns [`AgentError::Parse`](crate::AgentError::Parse) when the source has
/// unterminated strings or unbalanced brackets.
pub fn analyze_code_structure(code: &str) -> Result<CodeAnalysis> {
    let mut analysis = CodeAnalysis::default();
    let mut scopes: Vec<(usize, Scope)> = Vec::new();

    for line in logical_lines(code)? {
        let Some(statement) = parse_statement(&line.text) else {
            continue;
        };

        if !matches!(statement, Statement::Import { .. }) {
            while scopes.last().is_some_and(|(indent, _)| *indent >= line.indent) {
                scopes.pop();
            }
        }

        match statement {
            Statement::Class { name } => {
                scopes.push((line.indent, Scope::Class(analysis.classes.len())));
                analysis.classes.push(ClassInfo {
                    name,
                    methods: Vec::new(),
                    line_number: line.number,
                });
            }
            Statement::Function { name, args } => {
                if let Some((_, Scope::Class(index))) = scopes.last() {
                    analysis.classes[*index].methods.push(name.clone());
                }
                scopes.push((line.indent, Scope::Function));
                analysis.functions.push(FunctionInfo {
                    name,
                    args,
                    line_number: line.number,
                });
            }
            Statement::Import { names } => analysis.imports.extend(names),
        }
    }

    analysis.complexity_indicators = ComplexityIndicators {
        num_functions: analysis.functions.len(),
        num_classes: analysis.classes.len(),
        lines_of_code: code.lines().count(),
    };
    Ok(analysis)
}

/// Suggest improvements for an analysis.
#[must_use]
pub fn suggest_improvements(analysis: &CodeAnalysis) -> Vec<Suggestion> {
    let mut suggestions = Vec::new();

    for class in &analysis.classes {
        if class.methods.len() > MAX_METHODS_PER_CLASS {
            suggestions.push(Suggestion {
                kind: SuggestionKind::ClassComplexity,
                class_name: Some(class.name.clone()),
                suggestion: "Consider splitting this class into smaller, more focused classes"
                    .to_string(),
                reason: format!(
                    "Class has {} methods, which might indicate too many responsibilities",
                    class.methods.len()
                ),
            });
        }
    }

    if analysis.imports.len() > MAX_IMPORTS {
        suggestions.push(Suggestion {
            kind: SuggestionKind::ImportOrganization,
            class_name: None,
            suggestion: "Consider organizing imports into logical groups".to_string(),
            reason: "Large number of imports might indicate need for better module organization"
                .to_string(),
        });
    }

    if analysis.complexity_indicators.num_functions > MAX_FUNCTIONS {
        suggestions.push(Suggestion {
            kind: SuggestionKind::ModuleComplexity,
            class_name: None,
            suggestion: "Consider splitting this module into multiple files".to_string(),
            reason: "High number of functions might indicate too many responsibilities in one module"
                .to_string(),
        });
    }

    suggestions
}

fn delta(current: usize, previous: usize) -> i64 {
    let current = i64::try_from(current).unwrap_or(i64::MAX);
    let previous = i64::try_from(previous).unwrap_or(i64::MAX);
    current.saturating_sub(previous)
}

/// Compare `current` with the `previous` analysis.
#[must_use]
pub fn track_code_changes(current: &CodeAnalysis, previous: &CodeAnalysis) -> CodeChanges {
    let classes = |a: &CodeAnalysis| -> BTreeMap<String, Vec<String>> {
        a.classes
            .iter()
            .map(|c| (c.name.clone(), c.methods.clone()))
            .collect()
    };
    let functions = |a: &CodeAnalysis| -> BTreeSet<String> {
        a.functions.iter().map(|f| f.name.clone()).collect()
    };

    let (now, before) = (classes(current), classes(previous));
    let (fn_now, fn_before) = (functions(current), functions(previous));

    let complexity_change = current
        .complexity_indicators
        .entries()
        .into_iter()
        .zip(previous.complexity_indicators.entries())
        .map(|((metric, value), (_, prior))| (metric.to_string(), delta(value, prior)))
        .collect();

    CodeChanges {
        added_classes: now.keys().filter(|n| !before.contains_key(*n)).cloned().collect(),
        removed_classes: before.keys().filter(|n| !now.contains_key(*n)).cloned().collect(),
        modified_classes: now
            .iter()
            .filter(|(name, methods)| before.get(*name).is_some_and(|prior| prior != *methods))
            .map(|(name, _)| name.clone())
            .collect(),
        added_functions: fn_now.difference(&fn_before).cloned().collect(),
        removed_functions: fn_before.difference(&fn_now).cloned().collect(),
        complexity_change,
    }
}
