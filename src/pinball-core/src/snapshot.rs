// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

use std::collections::BTreeMap;

use serde::Serialize;

use crate::device::DeviceRegistry;

/// Last-read value of every polled device.
///
/// Coils read as 0/1, registers as raw 16-bit counts. A snapshot is always
/// built completely before anyone else sees it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Snapshot {
    values: BTreeMap<String, u16>,
}

impl Snapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every input device of the registry at 0.
    pub fn zeroed(registry: &DeviceRegistry) -> Self {
        Self {
            values: registry.inputs().map(|d| (d.name.clone(), 0)).collect(),
        }
    }

    /// Value of `name`, 0 when the device is unknown.
    pub fn get(&self, name: &str) -> u16 {
        self.value(name).unwrap_or(0)
    }

    pub fn value(&self, name: &str) -> Option<u16> {
        self.values.get(name).copied()
    }

    pub fn set(&mut self, name: impl Into<String>, value: u16) {
        self.values.insert(name.into(), value);
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, u16)> {
        self.values.iter().map(|(k, v)| (k.as_str(), *v))
    }

    /// Names whose value differs from `previous`, in name order.
    ///
    /// A device absent from `previous` counts as 0 there. Any difference
    /// counts, decreases included.
    pub fn changed_since<'a>(&'a self, previous: &Snapshot) -> Vec<&'a str> {
        self.iter()
            .filter(|(name, value)| previous.get(name) != *value)
            .map(|(name, _)| name)
            .collect()
    }
}

impl<S: Into<String>> FromIterator<(S, u16)> for Snapshot {
    fn from_iter<T: IntoIterator<Item = (S, u16)>>(iter: T) -> Self {
        Self {
            values: iter.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_reads_zero() {
        let snap: Snapshot = [("bumper", 4)].into_iter().collect();
        assert_eq!(snap.get("bumper"), 4);
        assert_eq!(snap.get("ghost"), 0);
        assert_eq!(snap.value("ghost"), None);
    }

    #[test]
    fn test_changed_since_fires_only_on_difference() {
        let sequence: Vec<Snapshot> = vec![
            [("a", 0), ("b", 0)].into_iter().collect(),
            [("a", 1), ("b", 0)].into_iter().collect(),
            [("a", 1), ("b", 0)].into_iter().collect(),
            [("a", 1), ("b", 7)].into_iter().collect(),
            [("a", 0), ("b", 7)].into_iter().collect(),
        ];

        for pair in sequence.windows(2) {
            let (prev, next) = (&pair[0], &pair[1]);
            let changed = next.changed_since(prev);
            for (name, value) in next.iter() {
                assert_eq!(changed.contains(&name), prev.get(name) != value);
            }
        }
    }

    #[test]
    fn test_decrease_counts_as_change() {
        let prev: Snapshot = [("drain", 3)].into_iter().collect();
        let next: Snapshot = [("drain", 0)].into_iter().collect();
        assert_eq!(next.changed_since(&prev), vec!["drain"]);
    }

    #[test]
    fn test_missing_previous_treated_as_zero() {
        let next: Snapshot = [("a", 0), ("b", 2)].into_iter().collect();
        assert_eq!(next.changed_since(&Snapshot::new()), vec!["b"]);
    }
}
