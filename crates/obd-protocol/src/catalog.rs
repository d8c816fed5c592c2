//! Candidate command catalogs handed to capability discovery

use crate::command::CommandDescriptor;
use crate::pid::MODE01;

/// Every numeric Mode 01 (live data) command, in PID order
pub fn mode01() -> Vec<CommandDescriptor> {
    MODE01.iter().map(CommandDescriptor::from_spec).collect()
}

/// Restrict a catalog to the named commands, keeping catalog order
pub fn filter_by_name(catalog: Vec<CommandDescriptor>, names: &[String]) -> Vec<CommandDescriptor> {
    if names.is_empty() {
        return catalog;
    }
    catalog
        .into_iter()
        .filter(|cmd| names.iter().any(|n| n.eq_ignore_ascii_case(cmd.name())))
        .collect()
}
