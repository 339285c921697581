//! The set of machines an operator has picked.

use std::collections::BTreeSet;

use fleet_core::{Machine, MachineName};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectionManager {
    selected: BTreeSet<MachineName>,
}

impl SelectionManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn select(&mut self, machine: &str) {
        self.selected.insert(machine.to_string());
    }

    pub fn deselect(&mut self, machine: &str) {
        self.selected.remove(machine);
    }

    /// Flip membership; returns whether the machine is now selected.
    pub fn toggle(&mut self, machine: &str) -> bool {
        if self.selected.remove(machine) {
            false
        } else {
            self.selected.insert(machine.to_string());
            true
        }
    }

    /// Replace the selection with exactly `machines`.
    pub fn select_all<I, S>(&mut self, machines: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.selected = machines.into_iter().map(Into::into).collect();
    }

    pub fn clear(&mut self) {
        self.selected.clear();
    }

    pub fn is_selected(&self, machine: &str) -> bool {
        self.selected.contains(machine)
    }

    pub fn count(&self) -> usize {
        self.selected.len()
    }

    pub fn has_selection(&self) -> bool {
        !self.selected.is_empty()
    }

    /// Selected names, sorted.
    pub fn names(&self) -> Vec<MachineName> {
        self.selected.iter().cloned().collect()
    }

    /// The records in `roster` that are selected, in roster order.
    pub fn pick(&self, roster: &[Machine]) -> Vec<Machine> {
        roster
            .iter()
            .filter(|m| self.selected.contains(&m.name))
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn select_toggle_and_clear() {
        let mut selection = SelectionManager::new();
        selection.select("m2");
        selection.select("m1");
        selection.select("m1");
        assert_eq!(selection.count(), 2);
        assert_eq!(selection.names(), vec!["m1".to_string(), "m2".to_string()]);

        assert!(!selection.toggle("m1"));
        assert!(selection.toggle("m3"));
        assert!(selection.is_selected("m3"));

        selection.deselect("m2");
        selection.deselect("missing");
        assert_eq!(selection.names(), vec!["m3".to_string()]);

        selection.clear();
        assert!(!selection.has_selection());
    }

    #[test]
    fn select_all_replaces_earlier_picks() {
        let mut selection = SelectionManager::new();
        selection.select("m9");
        selection.select_all(["m1", "m2"]);
        assert!(!selection.is_selected("m9"));
        assert_eq!(selection.names(), vec!["m1".to_string(), "m2".to_string()]);
    }

    #[test]
    fn pick_filters_roster() {
        let roster = vec![
            Machine::new("m1", "t"),
            Machine::new("m2", "t"),
            Machine::new("m3", "t"),
        ];
        let mut selection = SelectionManager::new();
        selection.select_all(["m3", "m1", "ghost"]);
        let picked: Vec<_> = selection.pick(&roster).into_iter().map(|m| m.name).collect();
        assert_eq!(picked, vec!["m1".to_string(), "m3".to_string()]);
    }
}
