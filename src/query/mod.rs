//! Filters and index selection (§4.6): an abstract predicate tree over
//! document values, evaluated against a document, and a simple rule-based
//! planner that picks an index probe over a conjunct when one is available.

use crate::codec::{cmp_value, eq_value, Document, Value};
use crate::collection::catalog::IndexDescriptor;
use std::cmp::Ordering;

/// A predicate tree (§4.6): `eq`, `lt`, `le`, `gt`, `ge`, `in`, `and`, `or`,
/// `not`. Field paths use the dotted-path convention `Document::get_path`
/// already understands.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Eq(String, Value),
    Lt(String, Value),
    Le(String, Value),
    Gt(String, Value),
    Ge(String, Value),
    In(String, Vec<Value>),
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Not(Box<Filter>),
    /// Matches every document — the empty filter, used by `findAll`.
    All,
}

impl Filter {
    /// Evaluates this filter against `doc`. A missing field never matches
    /// any comparison operator (including `in`), mirroring the usual
    /// document-database convention that absence is not equality with null.
    pub fn eval(&self, doc: &Document) -> bool {
        match self {
            Filter::All => true,
            Filter::Eq(path, v) => doc.get_path(path).is_some_and(|x| eq_value(x, v)),
            Filter::Lt(path, v) => doc.get_path(path).is_some_and(|x| cmp_value(x, v) == Ordering::Less),
            Filter::Le(path, v) => doc.get_path(path).is_some_and(|x| cmp_value(x, v) != Ordering::Greater),
            Filter::Gt(path, v) => doc.get_path(path).is_some_and(|x| cmp_value(x, v) == Ordering::Greater),
            Filter::Ge(path, v) => doc.get_path(path).is_some_and(|x| cmp_value(x, v) != Ordering::Less),
            Filter::In(path, vs) => doc.get_path(path).is_some_and(|x| vs.iter().any(|v| eq_value(x, v))),
            Filter::And(children) => children.iter().all(|f| f.eval(doc)),
            Filter::Or(children) => children.iter().any(|f| f.eval(doc)),
            Filter::Not(inner) => !inner.eval(doc),
        }
    }

    /// The conjuncts of this filter: itself if it is not an `And`, or its
    /// children if it is (the planner only looks one level into a
    /// conjunction per §4.6's "test each conjunct").
    fn conjuncts(&self) -> Vec<&Filter> {
        match self {
            Filter::And(children) => children.iter().collect(),
            other => vec![other],
        }
    }
}

/// An index probe the planner chose: which index, which comparison, and the
/// bound(s) to seek with.
#[derive(Debug, Clone, PartialEq)]
pub enum IndexProbe {
    Eq(Value),
    Range { low: Option<Value>, high: Option<Value> },
    In(Vec<Value>),
}

pub struct PlannedQuery<'a> {
    pub index: &'a IndexDescriptor,
    pub probe: IndexProbe,
    /// Every conjunct not consumed by the index probe; applied as a
    /// post-filter on the fetched documents (§4.6 step 2).
    pub residual: Filter,
}

/// `eq` is considered more selective than a range bound, matching §4.6's "eq
/// beats range" rule.
fn selectivity_rank(op: &Filter) -> u8 {
    match op {
        Filter::Eq(..) => 0,
        Filter::In(..) => 1,
        Filter::Lt(..) | Filter::Le(..) | Filter::Gt(..) | Filter::Ge(..) => 2,
        _ => 3,
    }
}

fn op_field(op: &Filter) -> Option<&str> {
    match op {
        Filter::Eq(p, _) | Filter::Lt(p, _) | Filter::Le(p, _) | Filter::Gt(p, _) | Filter::Ge(p, _) | Filter::In(p, _) => Some(p),
        _ => None,
    }
}

/// Chooses an index to probe for `filter` given the collection's index
/// registry, per §4.6's planning rule and the tie-break resolution recorded
/// in the expanded specification: lowest `priority`, then `eq` beats range,
/// then lexicographically-lowest field-path name.
pub fn choose_index<'a>(filter: &Filter, indexes: &'a [IndexDescriptor]) -> Option<PlannedQuery<'a>> {
    let conjuncts = filter.conjuncts();
    let mut best: Option<(&'a IndexDescriptor, &Filter)> = None;

    for conjunct in &conjuncts {
        let Some(field) = op_field(conjunct) else { continue };
        let Some(index) = indexes.iter().find(|i| i.field == field) else { continue };
        let better = match &best {
            None => true,
            Some((cur_index, cur_op)) => {
                (index.priority, selectivity_rank(conjunct), field)
                    < (cur_index.priority, selectivity_rank(cur_op), op_field(cur_op).unwrap_or(""))
            }
        };
        if better {
            best = Some((index, conjunct));
        }
    }

    let (index, chosen) = best?;
    let probe = match chosen {
        Filter::Eq(_, v) => IndexProbe::Eq(v.clone()),
        Filter::In(_, vs) => IndexProbe::In(vs.clone()),
        Filter::Lt(_, v) | Filter::Le(_, v) => IndexProbe::Range {
            low: None,
            high: Some(v.clone()),
        },
        Filter::Gt(_, v) | Filter::Ge(_, v) => IndexProbe::Range {
            low: Some(v.clone()),
            high: None,
        },
        _ => unreachable!("op_field only returns Some for comparison variants"),
    };

    let residual_conjuncts: Vec<Filter> = conjuncts
        .into_iter()
        .filter(|c| *c != chosen)
        .cloned()
        .collect();
    let residual = match residual_conjuncts.len() {
        0 => Filter::All,
        1 => residual_conjuncts.into_iter().next().unwrap(),
        _ => Filter::And(residual_conjuncts),
    };

    Some(PlannedQuery { index, probe, residual })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(name: &str, age: i32) -> Document {
        let mut d = Document::new();
        d.insert("name", Value::String(name.into()));
        d.insert("age", Value::Int32(age));
        d
    }

    #[test]
    fn eq_filter_matches_exact_field() {
        let f = Filter::Eq("name".into(), Value::String("alice".into()));
        assert!(f.eval(&doc("alice", 30)));
        assert!(!f.eval(&doc("bob", 30)));
    }

    #[test]
    fn missing_field_never_matches() {
        let f = Filter::Eq("missing".into(), Value::Null);
        assert!(!f.eval(&doc("alice", 30)));
    }

    #[test]
    fn and_or_not_compose() {
        let age_gt_20 = Filter::Gt("age".into(), Value::Int32(20));
        let name_is_bob = Filter::Eq("name".into(), Value::String("bob".into()));
        let both = Filter::And(vec![age_gt_20.clone(), name_is_bob.clone()]);
        assert!(both.eval(&doc("bob", 30)));
        assert!(!both.eval(&doc("alice", 30)));

        let either = Filter::Or(vec![age_gt_20, name_is_bob]);
        assert!(either.eval(&doc("alice", 30)));

        let not_bob = Filter::Not(Box::new(Filter::Eq("name".into(), Value::String("bob".into()))));
        assert!(not_bob.eval(&doc("alice", 30)));
        assert!(!not_bob.eval(&doc("bob", 30)));
    }

    fn idx(field: &str, priority: u32) -> IndexDescriptor {
        IndexDescriptor {
            field: field.into(),
            unique: false,
            priority,
            root: 1,
        }
    }

    #[test]
    fn chooses_the_only_indexable_conjunct() {
        let filter = Filter::And(vec![
            Filter::Eq("name".into(), Value::String("alice".into())),
            Filter::Gt("age".into(), Value::Int32(10)),
        ]);
        let indexes = vec![idx("name", 0)];
        let planned = choose_index(&filter, &indexes).unwrap();
        assert_eq!(planned.index.field, "name");
        assert_eq!(planned.probe, IndexProbe::Eq(Value::String("alice".into())));
        assert_eq!(planned.residual, Filter::Gt("age".into(), Value::Int32(10)));
    }

    #[test]
    fn eq_beats_range_when_both_are_indexed_at_equal_priority() {
        let filter = Filter::And(vec![
            Filter::Gt("age".into(), Value::Int32(10)),
            Filter::Eq("name".into(), Value::String("alice".into())),
        ]);
        let indexes = vec![idx("age", 0), idx("name", 0)];
        let planned = choose_index(&filter, &indexes).unwrap();
        assert_eq!(planned.index.field, "name");
    }

    #[test]
    fn lower_priority_index_wins_even_over_an_eq_conjunct() {
        let filter = Filter::And(vec![
            Filter::Eq("name".into(), Value::String("alice".into())),
            Filter::Gt("age".into(), Value::Int32(10)),
        ]);
        let indexes = vec![idx("name", 5), idx("age", 0)];
        let planned = choose_index(&filter, &indexes).unwrap();
        assert_eq!(planned.index.field, "age");
    }

    #[test]
    fn no_plan_when_no_conjunct_is_indexed() {
        let filter = Filter::Eq("unindexed".into(), Value::Int32(1));
        let indexes = vec![idx("name", 0)];
        assert!(choose_index(&filter, &indexes).is_none());
    }
}
