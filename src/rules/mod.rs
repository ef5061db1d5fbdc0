// Rule engine - rule records, YAML loading and compiled rule sets
pub mod loader;
pub mod rule;
pub mod ruleset;

pub use loader::{
    compile_rules, load_rule_files, load_rules_file, parse_content_pattern, parse_ip_spec,
    parse_port_spec, RuleDefinition, RuleFile,
};
pub use rule::{
    Direction, IpSpec, PortSpec, Protocol, RuleAction, RuleHeader, RuleId, RuleRecord,
};
pub use ruleset::{CompiledRule, GroupKey, RuleSet, RuleSetStats};
