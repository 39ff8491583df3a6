//! Tools available to the agent.
//!
//! | Tool                     | Input                        | Output            |
//! |--------------------------|------------------------------|-------------------|
//! | `analyze_code_structure` | Python source                | [`CodeAnalysis`]  |
//! | `suggest_improvements`   | [`CodeAnalysis`]             | [`Suggestion`]s   |
//! | `track_code_changes`     | current + previous analysis  | [`CodeChanges`]   |

pub mod analysis;
pub mod source;

pub use analysis::{
    ClassInfo, CodeAnalysis, CodeChanges, ComplexityIndicators, FunctionInfo, Suggestion,
    SuggestionKind, analyze_code_structure, suggest_improvements, track_code_changes,
};

/// The tools the agent can call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolKind {
    /// Scan source for classes, functions and imports
    AnalyzeCodeStructure,
    /// Flag oversized classes and modules
    SuggestImprovements,
    /// Diff against the previous analysis
    TrackCodeChanges,
}

impl ToolKind {
    /// Every tool, in the order the code analysis pipeline runs them.
    pub const ALL: [Self; 3] = [
        Self::AnalyzeCodeStructure,
        Self::TrackCodeChanges,
        Self::SuggestImprovements,
    ];

    /// Registered tool name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::AnalyzeCodeStructure => "analyze_code_structure",
            Self::SuggestImprovements => "suggest_improvements",
            Self::TrackCodeChanges => "track_code_changes",
        }
    }

    /// One-line description.
    #[must_use]
    pub const fn description(self) -> &'static str {
        match self {
            Self::AnalyzeCodeStructure => "Analyzes Python code structure and returns insights",
            Self::SuggestImprovements => "Suggests code improvements based on analysis",
            Self::TrackCodeChanges => "Tracks changes in code structure over time",
        }
    }

    /// Look a tool up by its registered name.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|tool| tool.name() == name)
    }
}

impl std::fmt::Display for ToolKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
