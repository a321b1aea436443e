//! Selection set model parsed from GraphQL documents.

mod query;
mod selection;

pub use query::Fragment;
pub use query::Fragments;
pub use query::Operation;
pub use query::OperationKind;
pub use query::Query;
pub use selection::ArgumentValue;
pub use selection::Condition;
pub use selection::IncludeSkip;
pub use selection::Selection;
pub(crate) use selection::RECURSION_LIMIT;

pub(crate) const TYPENAME: &str = "__typename";
