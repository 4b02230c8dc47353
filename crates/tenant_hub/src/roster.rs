//! Roster computation: who is visibly present in a tenant.

use std::collections::HashSet;

/// What the roster needs to know about one connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RosterEntry {
    pub name: String,
    /// Child connections share their parent tab's identity
    pub is_child: bool,
}

/// Computes the ordered roster from entries in arrival order.
///
/// Child connections contribute nothing. Anonymous names appear once per
/// connection; any other name appears only the first time it is seen.
pub fn compute_roster<'a, I, F>(entries: I, is_anonymous: F) -> Vec<String>
where
    I: IntoIterator<Item = &'a RosterEntry>,
    F: Fn(&str) -> bool,
{
    let mut seen = HashSet::new();
    let mut names = Vec::new();
    for entry in entries {
        if entry.is_child {
            continue;
        }
        let first_sighting = seen.insert(entry.name.as_str());
        if is_anonymous(&entry.name) || first_sighting {
            names.push(entry.name.clone());
        }
    }
    names
}
