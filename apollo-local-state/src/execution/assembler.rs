//! Assembly of one result object.

use std::ops::Range;

use serde_json_bytes::ByteString;

use crate::json_ext::Object;
use crate::json_ext::Value;

/// Pending fields and errors produced while computing one field.
///
/// Both are identified by their position in execution-wide sequences.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct Span {
    pub(crate) pending: Range<usize>,
    pub(crate) errors: Range<usize>,
}

impl Span {
    /// `true` when the field completed without error and without waiting.
    pub(crate) fn is_clean(&self) -> bool {
        self.pending.is_empty() && self.errors.is_empty()
    }
}

/// Builds a result object from `(output key, value)` pairs given in plan order.
///
/// The first insertion of a key fixes its position, the last one its value. Replacing a
/// key returns the [`Span`] of the replaced field so that its pending fields and errors
/// can be discarded.
#[derive(Debug, Default)]
pub(crate) struct ResultAssembler {
    object: Object,
    spans: Vec<(ByteString, Span)>,
}

impl ResultAssembler {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert(&mut self, key: ByteString, value: Value, span: Span) -> Option<Span> {
        let superseded = if self.object.contains_key(key.as_str()) {
            self.spans
                .iter()
                .position(|(existing, _)| existing == &key)
                .map(|index| self.spans.swap_remove(index).1)
        } else {
            None
        };
        if !span.is_clean() {
            self.spans.push((key.clone(), span));
        }
        self.object.insert(key, value);
        superseded
    }

    pub(crate) fn finish(self) -> Object {
        self.object
    }
}

#[cfg(test)]
mod tests {
    use serde_json_bytes::json;

    use super::*;
    use crate::json_ext::ValueExt;

    fn span(pending: Range<usize>, errors: Range<usize>) -> Span {
        Span { pending, errors }
    }

    #[test]
    fn keeps_plan_order() {
        let mut assembler = ResultAssembler::new();
        assembler.insert("id".into(), json!("1"), Span::default());
        assembler.insert("serverOrClient".into(), json!("client"), Span::default());
        assembler.insert("foo".into(), json!([]), Span::default());
        assert!(Value::Object(assembler.finish())
            .eq_and_ordered(&json!({"id": "1", "serverOrClient": "client", "foo": []})));
    }

    #[test]
    fn last_write_wins_at_first_position() {
        let mut assembler = ResultAssembler::new();
        assert_eq!(assembler.insert("a".into(), json!(1), span(0..1, 0..0)), None);
        assembler.insert("b".into(), json!(2), Span::default());
        assert_eq!(
            assembler.insert("a".into(), json!(3), span(1..1, 0..1)),
            Some(span(0..1, 0..0))
        );
        // the replacing field's own span is tracked in turn
        assert_eq!(
            assembler.insert("a".into(), json!(4), Span::default()),
            Some(span(1..1, 0..1))
        );
        assert!(Value::Object(assembler.finish()).eq_and_ordered(&json!({"a": 4, "b": 2})));
    }

    #[test]
    fn clean_fields_are_not_reported() {
        let mut assembler = ResultAssembler::new();
        assembler.insert("a".into(), json!(1), Span::default());
        assert_eq!(assembler.insert("a".into(), json!(2), Span::default()), None);
    }
}
