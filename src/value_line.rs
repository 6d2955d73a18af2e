//! Piecewise-constant parameters over tick time.

use crate::{
    prelude::*,
    timeline::{NodeRef, OrderedTimeline},
};

/// A point in time where a parameter takes a new value.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Hash)]
pub struct ValueChange<T> {
    /// Absolute time of the change, in ticks.
    pub time: u64,
    /// The value active from `time` onwards, until the next change.
    pub value: T,
}

/// The full timeline of one parameter, like tempo or time signature.
///
/// Before the first change the line holds its default value. Changes are coalesced: there is
/// never more than one change at a given time, and no change repeats the value already active
/// when it occurs.
#[derive(Clone, Debug)]
pub struct ValueLine<T> {
    default: T,
    changes: OrderedTimeline<u64, T>,
}
impl<T: Clone + PartialEq> ValueLine<T> {
    /// Create a line with no changes.
    pub fn new(default: T) -> ValueLine<T> {
        ValueLine {
            default,
            changes: OrderedTimeline::new(),
        }
    }

    /// The value active before the first change.
    #[inline]
    pub fn default_value(&self) -> &T {
        &self.default
    }

    /// Amount of changes in the line.
    #[inline]
    pub fn len(&self) -> usize {
        self.changes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// The value active at the given tick.
    pub fn at_time(&self, time: u64) -> &T {
        match self.changes.last_at_or_below(&time) {
            Some(node) => self.changes.get(node).map_or(&self.default, |(_, v)| v),
            None => &self.default,
        }
    }

    /// The value set exactly at the given tick, if there is a change there.
    pub fn change_at(&self, time: u64) -> Option<&T> {
        let node = self.changes.find_exact(&time)?;
        self.changes.get(node).map(|(_, v)| v)
    }

    /// Set the value from `time` onwards, up to the next change.
    ///
    /// Setting the value that is already active is a no-op.
    pub fn set_value(&mut self, time: u64, value: T) {
        if *self.at_time(time) == value {
            return;
        }
        if let Some(node) = self.changes.find_exact(&time) {
            self.changes.delete(node);
        }
        if *self.at_time(time) != value {
            self.changes.insert(time, value);
        }
        self.coalesce_after(time);
        debug_assert!(self.changes.find_all_at(&time).nth(1).is_none());
    }

    /// Remove every change with `start <= time <= end`, returning how many were removed.
    pub fn delete_values(&mut self, start: u64, end: u64) -> usize {
        if start > end {
            return 0;
        }
        let doomed: Vec<_> = self
            .nodes_from(self.first_node_at_or_after(start))
            .take_while(|&node| self.changes.get(node).map_or(false, |(t, _)| *t <= end))
            .collect();
        for &node in &doomed {
            self.changes.delete(node);
        }
        self.coalesce_after(end);
        doomed.len()
    }

    /// All changes in ascending time order.
    pub fn values(&self) -> impl Iterator<Item = ValueChange<T>> + '_ {
        self.changes.iter().map(|(&time, value)| ValueChange {
            time,
            value: value.clone(),
        })
    }

    /// Changes strictly after `time`, in ascending order.
    pub fn changes_after(&self, time: u64) -> impl Iterator<Item = ValueChange<&T>> + '_ {
        let first = match self.changes.last_at_or_below(&time) {
            Some(node) => self.changes.next(node),
            None => self.changes.first(),
        };
        self.nodes_from(first).filter_map(move |node| self.change(node))
    }

    /// Changes strictly before `time`, in descending order.
    pub fn changes_before(&self, time: u64) -> impl Iterator<Item = ValueChange<&T>> + '_ {
        let mut cur = self.changes.last_below(&time);
        core::iter::from_fn(move || {
            let node = cur?;
            cur = self.changes.prev(node);
            self.change(node)
        })
    }

    /// The first change strictly after `time`.
    #[inline]
    pub fn next_change_after(&self, time: u64) -> Option<ValueChange<&T>> {
        self.changes_after(time).next()
    }

    fn change(&self, node: NodeRef) -> Option<ValueChange<&T>> {
        self.changes
            .get(node)
            .map(|(&time, value)| ValueChange { time, value })
    }

    fn first_node_at_or_after(&self, time: u64) -> Option<NodeRef> {
        match self.changes.last_below(&time) {
            Some(node) => self.changes.next(node),
            None => self.changes.first(),
        }
    }

    fn nodes_from(&self, first: Option<NodeRef>) -> impl Iterator<Item = NodeRef> + '_ {
        let mut cur = first;
        core::iter::from_fn(move || {
            let node = cur?;
            cur = self.changes.next(node);
            Some(node)
        })
    }

    /// Drop the first change after `time` if it repeats the value active at `time`.
    fn coalesce_after(&mut self, time: u64) {
        let redundant = match self.next_change_after(time) {
            Some(next) if next.value == self.at_time(time) => Some(next.time),
            _ => None,
        };
        if let Some(node) = redundant.and_then(|t| self.changes.find_exact(&t)) {
            self.changes.delete(node);
        }
    }

    #[cfg(test)]
    pub(crate) fn timeline(&self) -> &OrderedTimeline<u64, T> {
        &self.changes
    }
}
impl<T: Clone + PartialEq + Default> Default for ValueLine<T> {
    fn default() -> Self {
        ValueLine::new(T::default())
    }
}
