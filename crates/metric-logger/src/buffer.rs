// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::metric::{Batch, MetricPoint};
use hashbrown::HashMap;
use ustr::Ustr;

/// Reusable staging area for one flush.
///
/// Slots are pre-allocated and only the slots in use are reset on `clear`, so a buffer
/// that lives across many flush cycles stops allocating once it reached its working size.
/// Points are grouped per metric name in enqueue order; groups are listed in the order
/// their first point arrived.
#[derive(Debug)]
pub struct MetricBuffer {
    slots: Vec<Option<MetricPoint>>,
    active: Vec<usize>,
    groups: Vec<Batch>,
    index: HashMap<Ustr, usize>,
}

impl MetricBuffer {
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        MetricBuffer {
            slots: vec![None; capacity],
            active: Vec::with_capacity(capacity),
            groups: Vec::new(),
            index: HashMap::new(),
        }
    }

    pub fn add(&mut self, point: MetricPoint) {
        if self.active.len() >= self.slots.len() {
            let doubled = self.slots.len() * 2;
            self.slots.resize(doubled, None);
        }
        let slot = self.active.len();
        self.slots[slot] = Some(point);
        self.active.push(slot);

        let group = *self.index.entry(point.name).or_insert_with(|| {
            self.groups.push(Batch::new(point.name));
            self.groups.len() - 1
        });
        self.groups[group].push(point.step, point.value);
    }

    pub fn extend(&mut self, points: impl IntoIterator<Item = MetricPoint>) {
        for point in points {
            self.add(point);
        }
    }

    /// Resets the slots in use and drops the grouping.
    pub fn clear(&mut self) {
        for &slot in &self.active {
            self.slots[slot] = None;
        }
        self.active.clear();
        self.groups.clear();
        self.index.clear();
    }

    /// Staged points in insertion order.
    pub fn points(&self) -> impl Iterator<Item = &MetricPoint> {
        self.active.iter().filter_map(|&slot| self.slots[slot].as_ref())
    }

    /// One batch per metric name.
    #[must_use]
    pub fn groups(&self) -> &[Batch] {
        &self.groups
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.active.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use ustr::ustr;

    fn point(name: &str, step: f64) -> MetricPoint {
        MetricPoint::new(ustr(name), step, step * 10.0).expect("finite point")
    }

    #[test]
    fn test_groups_by_name_in_order() {
        let mut buffer = MetricBuffer::with_capacity(8);
        buffer.add(point("run_loss", 1.0));
        buffer.add(point("run_acc", 1.0));
        buffer.add(point("run_loss", 2.0));
        buffer.add(point("run_loss", 3.0));

        let groups = buffer.groups();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].name.as_str(), "run_loss");
        assert_eq!(groups[0].x_coordinates, vec![1.0, 2.0, 3.0]);
        assert_eq!(groups[0].y_coordinates, vec![10.0, 20.0, 30.0]);
        assert_eq!(groups[1].name.as_str(), "run_acc");
        assert_eq!(groups[1].x_coordinates, vec![1.0]);
    }

    #[test]
    fn test_grows_by_doubling() {
        let mut buffer = MetricBuffer::with_capacity(2);
        for step in 0..5 {
            buffer.add(point("run_loss", f64::from(step)));
        }
        assert_eq!(buffer.len(), 5);
        assert_eq!(buffer.capacity(), 8);
    }

    #[test]
    fn test_clear_keeps_capacity() {
        let mut buffer = MetricBuffer::with_capacity(2);
        for step in 0..3 {
            buffer.add(point("run_loss", f64::from(step)));
        }
        buffer.clear();
        assert!(buffer.is_empty());
        assert!(buffer.groups().is_empty());
        assert_eq!(buffer.points().count(), 0);
        assert_eq!(buffer.capacity(), 4);

        buffer.add(point("run_acc", 9.0));
        assert_eq!(buffer.groups().len(), 1);
        assert_eq!(buffer.groups()[0].name.as_str(), "run_acc");
    }

    proptest! {
        #[test]
        fn prop_grouping_preserves_per_name_order(
            names in proptest::collection::vec(0usize..4, 0..200),
        ) {
            let mut buffer = MetricBuffer::with_capacity(4);
            for (step, name) in names.iter().enumerate() {
                buffer.add(point(&format!("m{name}"), step as f64));
            }
            prop_assert_eq!(buffer.len(), names.len());

            let total: usize = buffer.groups().iter().map(Batch::len).sum();
            prop_assert_eq!(total, names.len());
            for group in buffer.groups() {
                prop_assert_eq!(group.x_coordinates.len(), group.y_coordinates.len());
                prop_assert!(group.x_coordinates.windows(2).all(|w| w[0] < w[1]));
            }

            let staged: Vec<f64> = buffer.points().map(|p| p.step).collect();
            prop_assert!(staged.windows(2).all(|w| w[0] < w[1]));
        }
    }
}
