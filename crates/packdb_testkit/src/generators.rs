//! Property-based test generators using proptest.
//!
//! Provides strategies for generating sample entities and operation
//! sequences over a small id space, so generated operations collide often.

use crate::entities::{Gadget, Widget};
use proptest::prelude::*;

/// Largest id the generators produce.
pub const MAX_ID: u64 = 8;

/// Strategy for ids in `1..=MAX_ID`.
pub fn id_strategy() -> impl Strategy<Value = u64> {
    1..=MAX_ID
}

/// Strategy for widget names drawn from a small alphabet.
pub fn widget_name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-d]{1,2}").expect("Invalid regex")
}

/// Strategy for widgets.
pub fn widget_strategy() -> impl Strategy<Value = Widget> {
    (id_strategy(), widget_name_strategy(), 0u32..4)
        .prop_map(|(id, name, revision)| Widget::new(id, name).at_revision(revision))
}

/// Strategy for gadgets; roughly one in four has no color.
pub fn gadget_strategy() -> impl Strategy<Value = Gadget> {
    let color = prop_oneof![
        1 => Just(None),
        3 => prop::sample::select(vec!["red", "green", "blue"]).prop_map(Some),
    ];
    (id_strategy(), color, 0u32..5).prop_map(|(id, color, weight)| Gadget::new(id, color, weight))
}

/// One step of a widget lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WidgetOp {
    /// Write (create or update) the widget.
    Write(Widget),
    /// Soft-delete the id.
    Delete(u64),
    /// Restore the id.
    Restore(u64),
    /// Roll the id back to its last audit snapshot.
    Rollback(u64),
}

/// Strategy for a single lifecycle step.
pub fn widget_op_strategy() -> impl Strategy<Value = WidgetOp> {
    prop_oneof![
        4 => widget_strategy().prop_map(WidgetOp::Write),
        1 => id_strategy().prop_map(WidgetOp::Delete),
        1 => id_strategy().prop_map(WidgetOp::Restore),
        1 => id_strategy().prop_map(WidgetOp::Rollback),
    ]
}

/// Strategy for a sequence of lifecycle steps.
pub fn widget_ops_strategy(max_len: usize) -> impl Strategy<Value = Vec<WidgetOp>> {
    prop::collection::vec(widget_op_strategy(), 1..=max_len)
}
