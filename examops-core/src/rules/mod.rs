// Rule Engine: deterministic formatting transforms.
// - engine.rs: RuleEngine, FormatRule trait and the config-driven pipeline
// - header_footer.rs, margins.rs: document-level rules
// - numbering.rs, marks.rs, spacing.rs, indentation.rs: paragraph-level rules

pub mod engine;
pub mod header_footer;
pub mod indentation;
pub mod margins;
pub mod marks;
pub mod numbering;
pub mod spacing;

pub use engine::*;
pub use indentation::numbering_level;
