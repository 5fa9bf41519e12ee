//! Query planning: index selection and key/filter partitioning.
//!
//! Planning is pure. It validates every predicate, works out which fields
//! have a known equality value (directly, through a decomposed composite, or
//! through a derivable composite), ranks every access path whose hash key is
//! satisfied, and splits the predicates into the key condition of the
//! chosen path and a residual filter evaluated by the backend.

use std::collections::{BTreeSet, HashMap};
use std::fmt;

use dynamap_model::{AttributeValue, IndexKind};
use tracing::debug;

use crate::backend::{Condition, ConditionOp, KeyCondition};
use crate::condition::{Operand, Operator, Predicate};
use crate::error::{MapperError, MapperResult};
use crate::schema::index::KeySlots;
use crate::schema::{AccessPath, ModelSchema};
use crate::value::Value;

/// Whether the plan reads through a key condition or visits the whole table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanMode {
    /// Key-condition read of the table or an index.
    Query,
    /// Full table scan.
    Scan,
}

/// The planner's decision for one filter set.
#[derive(Debug, Clone, PartialEq)]
pub struct Plan {
    mode: PlanMode,
    access: AccessPath,
    key_condition: Option<KeyCondition>,
    filter: Vec<Condition>,
    key_terms: Vec<String>,
    filter_terms: Vec<String>,
}

impl Plan {
    /// Query or scan.
    #[must_use]
    pub fn mode(&self) -> PlanMode {
        self.mode
    }

    /// Chosen access path. Scans always read the table.
    #[must_use]
    pub fn access(&self) -> &AccessPath {
        &self.access
    }

    /// Index name, `None` for the table.
    #[must_use]
    pub fn index_name(&self) -> Option<&str> {
        self.access.index_name()
    }

    /// Key condition; `None` for scans.
    #[must_use]
    pub fn key_condition(&self) -> Option<&KeyCondition> {
        self.key_condition.as_ref()
    }

    /// Residual conditions evaluated by the backend.
    #[must_use]
    pub fn filter(&self) -> &[Condition] {
        &self.filter
    }
}

impl fmt::Display for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.mode {
            PlanMode::Query => write!(
                f,
                "query {} key [{}]",
                self.access,
                self.key_terms.join(" AND ")
            )?,
            PlanMode::Scan => f.write_str("scan table")?,
        }
        if !self.filter_terms.is_empty() {
            write!(f, " filter [{}]", self.filter_terms.join(" AND "))?;
        }
        Ok(())
    }
}

/// Plans a query or scan of `schema` for `predicates`.
///
/// `index` names an explicit access path and bypasses automatic selection.
pub fn plan(
    schema: &ModelSchema,
    predicates: &[Predicate],
    index: Option<&str>,
    mode: PlanMode,
) -> MapperResult<Plan> {
    let predicates = normalize(schema, predicates)?;
    let plan = match mode {
        PlanMode::Scan => plan_scan(schema, &predicates, index)?,
        PlanMode::Query => Planner::new(schema, &predicates).plan(index)?,
    };
    debug!(model = schema.name(), plan = %plan, "planned");
    Ok(plan)
}

/// Validates operators and coerces operands to the field types.
fn normalize(schema: &ModelSchema, predicates: &[Predicate]) -> MapperResult<Vec<Predicate>> {
    predicates
        .iter()
        .map(|p| {
            p.ensure_supported()?;
            // Undeclared names refer to extra attributes: filter-only and
            // compared in their stored encoding.
            let Some(def) = schema.field(p.field()) else {
                return Ok(p.clone());
            };
            if !def.data_type().allows(p.operator()) {
                return Err(MapperError::UnsupportedOperator {
                    field: p.field().to_owned(),
                    operator: format!("{} on {}", p.operator(), def.data_type()),
                });
            }
            p.try_map_values(|v| schema.coerce_operand(p.field(), v))
        })
        .collect()
}

fn plan_scan(
    schema: &ModelSchema,
    predicates: &[Predicate],
    index: Option<&str>,
) -> MapperResult<Plan> {
    if let Some(index) = index {
        return Err(MapperError::ScanWithIndex {
            model: schema.name().to_owned(),
            index: index.to_owned(),
        });
    }
    Ok(Plan {
        mode: PlanMode::Scan,
        access: AccessPath::Table,
        key_condition: None,
        filter: predicates
            .iter()
            .map(|p| to_condition(schema, p))
            .collect::<MapperResult<_>>()?,
        key_terms: Vec::new(),
        filter_terms: predicates.iter().map(ToString::to_string).collect(),
    })
}

// ---------------------------------------------------------------------------
// Index selection
// ---------------------------------------------------------------------------

/// A field whose equality value is known.
#[derive(Debug, Clone)]
struct EqFact {
    value: Value,
    /// Caller predicates this value is implied by.
    needs: BTreeSet<usize>,
    /// Whether the value alone implies all of `needs`.
    exact: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RangeMatch {
    Unmatched,
    Predicate(usize),
    Derived,
    Multiple,
}

#[derive(Debug)]
struct Candidate<'a> {
    slots: KeySlots<'a>,
    range: RangeMatch,
    needs: BTreeSet<usize>,
}

impl Candidate<'_> {
    fn rank(&self) -> (bool, usize) {
        (self.range != RangeMatch::Unmatched, self.needs.len())
    }
}

struct Planner<'a> {
    schema: &'a ModelSchema,
    predicates: &'a [Predicate],
    facts: HashMap<String, EqFact>,
}

impl<'a> Planner<'a> {
    fn new(schema: &'a ModelSchema, predicates: &'a [Predicate]) -> Self {
        let mut facts = HashMap::new();
        for (i, p) in predicates.iter().enumerate() {
            if let (Operator::Eq, Operand::One(value)) = (p.operator(), p.operand()) {
                facts.entry(p.field().to_owned()).or_insert_with(|| EqFact {
                    value: value.clone(),
                    needs: BTreeSet::from([i]),
                    exact: true,
                });
            }
        }
        let mut planner = Self {
            schema,
            predicates,
            facts,
        };
        planner.close_facts();
        planner
    }

    /// Expands and derives composite equalities until nothing changes.
    fn close_facts(&mut self) {
        let schema = self.schema;
        let mut changed = true;
        while changed {
            changed = false;
            for composite in schema.composites() {
                if let Some(fact) = self.facts.get(composite.name()).cloned() {
                    if schema.is_decomposable(composite) {
                        if let Ok(parts) = schema.decompose(composite, &fact.value) {
                            for (source, value) in parts {
                                if !self.facts.contains_key(&source) {
                                    self.facts.insert(
                                        source,
                                        EqFact {
                                            value,
                                            needs: fact.needs.clone(),
                                            exact: false,
                                        },
                                    );
                                    changed = true;
                                }
                            }
                        }
                    }
                    continue;
                }

                let sources: Option<Vec<&EqFact>> = composite
                    .sources()
                    .iter()
                    .map(|s| self.facts.get(s))
                    .collect();
                let Some(sources) = sources else {
                    continue;
                };
                let needs: BTreeSet<usize> =
                    sources.iter().flat_map(|f| f.needs.iter().copied()).collect();
                // A separator inside a leading source makes the join ambiguous.
                let exact = sources.iter().all(|f| f.exact)
                    && composite.splits_back(&sources.iter().map(|f| &f.value).collect::<Vec<_>>());
                let Ok(value) =
                    composite.resolve(|s| self.facts.get(s).map(|f| f.value.clone()))
                else {
                    continue;
                };
                self.facts.insert(
                    composite.name().to_owned(),
                    EqFact {
                        value,
                        needs,
                        exact,
                    },
                );
                changed = true;
            }
        }
    }

    /// Caller predicates on `field` usable as a range key condition.
    fn range_predicates(&self, field: &str) -> Vec<usize> {
        self.predicates
            .iter()
            .enumerate()
            .filter(|(_, p)| {
                p.field() == field && (p.operator() == Operator::Eq || p.operator().is_range())
            })
            .map(|(i, _)| i)
            .collect()
    }

    fn candidate(&self, slots: KeySlots<'a>) -> Option<Candidate<'a>> {
        let hash = self.facts.get(slots.hash_key)?;
        let mut needs = hash.needs.clone();
        let range = match slots.range_key {
            None => RangeMatch::Unmatched,
            Some(range_key) => match self.range_predicates(range_key).as_slice() {
                [] => match self.facts.get(range_key) {
                    Some(fact) => {
                        needs.extend(fact.needs.iter().copied());
                        RangeMatch::Derived
                    }
                    None => RangeMatch::Unmatched,
                },
                [i] => {
                    needs.insert(*i);
                    RangeMatch::Predicate(*i)
                }
                _ => RangeMatch::Multiple,
            },
        };
        Some(Candidate {
            slots,
            range,
            needs,
        })
    }

    fn plan(&self, index: Option<&str>) -> MapperResult<Plan> {
        let chosen = match index {
            Some(name) => self.select_override(name)?,
            None => self.select()?,
        };
        if chosen.range == RangeMatch::Multiple {
            return Err(MapperError::MultipleRangeCondition {
                model: self.schema.name().to_owned(),
                field: chosen.slots.range_key.unwrap_or_default().to_owned(),
            });
        }
        self.build(&chosen)
    }

    fn select(&self) -> MapperResult<Candidate<'a>> {
        let catalog = self.schema.catalog();
        let mut candidates: Vec<Candidate<'a>> = catalog
            .all_slots()
            .filter_map(|slots| self.candidate(slots))
            .filter(|c| {
                c.slots.kind != Some(IndexKind::Local) || c.range != RangeMatch::Unmatched
            })
            .collect();

        let Some(best) = candidates.iter().map(Candidate::rank).max() else {
            return Err(self.no_candidate());
        };
        candidates.retain(|c| c.rank() == best);
        if candidates.len() > 1 {
            return Err(MapperError::AmbiguousIndex {
                model: self.schema.name().to_owned(),
                candidates: candidates.iter().map(|c| c.slots.name.to_owned()).collect(),
            });
        }
        candidates.pop().ok_or_else(|| self.no_candidate())
    }

    fn select_override(&self, name: &str) -> MapperResult<Candidate<'a>> {
        let catalog = self.schema.catalog();
        let index = catalog
            .index(name)
            .ok_or_else(|| MapperError::UnknownIndex {
                model: self.schema.name().to_owned(),
                index: name.to_owned(),
            })?;
        let slots = catalog.index_slots(index);
        self.candidate(slots)
            .ok_or_else(|| MapperError::MissingHashKey {
                model: self.schema.name().to_owned(),
                field: slots.hash_key.to_owned(),
            })
    }

    fn no_candidate(&self) -> MapperError {
        let mut fields: Vec<String> = Vec::new();
        for p in self.predicates {
            if p.operator() == Operator::Eq && !fields.iter().any(|f| f == p.field()) {
                fields.push(p.field().to_owned());
            }
        }
        if fields.is_empty() {
            MapperError::MissingHashKey {
                model: self.schema.name().to_owned(),
                field: self.schema.catalog().hash_key().to_owned(),
            }
        } else {
            MapperError::NoMatchingIndex {
                model: self.schema.name().to_owned(),
                fields,
            }
        }
    }

    fn build(&self, chosen: &Candidate<'a>) -> MapperResult<Plan> {
        let schema = self.schema;
        let slots = chosen.slots;
        let hash = &self.facts[slots.hash_key];
        let mut key_terms = vec![format!("{} = {}", slots.hash_key, hash.value)];
        // Predicates that only imply the key value loosely stay in the filter.
        let mut loose: BTreeSet<usize> = BTreeSet::new();
        if !hash.exact {
            loose.extend(hash.needs.iter().copied());
        }

        let range = match (chosen.range, slots.range_key) {
            (RangeMatch::Predicate(i), Some(_)) => {
                let predicate = &self.predicates[i];
                key_terms.push(predicate.to_string());
                Some(to_condition(schema, predicate)?)
            }
            (RangeMatch::Derived, Some(range_key)) => {
                let fact = &self.facts[range_key];
                if !fact.exact {
                    loose.extend(fact.needs.iter().copied());
                }
                key_terms.push(format!("{range_key} = {}", fact.value));
                Some(Condition::new(
                    range_key,
                    ConditionOp::Eq(encode_operand(schema, range_key, &fact.value)?),
                ))
            }
            _ => None,
        };

        let residual: Vec<&Predicate> = self
            .predicates
            .iter()
            .enumerate()
            .filter(|(i, _)| !chosen.needs.contains(i) || loose.contains(i))
            .map(|(_, p)| p)
            .collect();

        Ok(Plan {
            mode: PlanMode::Query,
            access: slots.path(),
            key_condition: Some(KeyCondition {
                hash_attribute: slots.hash_key.to_owned(),
                hash_value: encode_operand(schema, slots.hash_key, &hash.value)?,
                range,
            }),
            filter: residual
                .iter()
                .map(|p| to_condition(schema, p))
                .collect::<MapperResult<_>>()?,
            key_terms,
            filter_terms: residual.iter().map(ToString::to_string).collect(),
        })
    }
}

// ---------------------------------------------------------------------------
// Encoding
// ---------------------------------------------------------------------------

fn encode_operand(schema: &ModelSchema, field: &str, value: &Value) -> MapperResult<AttributeValue> {
    schema
        .encode_attribute(field, value)?
        .ok_or_else(|| MapperError::UnsupportedOperator {
            field: field.to_owned(),
            operator: "comparison with an empty set".to_owned(),
        })
}

/// Lowers a normalized predicate to a backend condition.
fn to_condition(schema: &ModelSchema, predicate: &Predicate) -> MapperResult<Condition> {
    let field = predicate.field();
    let encode = |v: &Value| encode_operand(schema, field, v);
    let op = match (predicate.operator(), predicate.operand()) {
        (Operator::Eq, Operand::One(v)) => ConditionOp::Eq(encode(v)?),
        (Operator::Lt, Operand::One(v)) => ConditionOp::Lt(encode(v)?),
        (Operator::Lte, Operand::One(v)) => ConditionOp::Le(encode(v)?),
        (Operator::Gt, Operand::One(v)) => ConditionOp::Gt(encode(v)?),
        (Operator::Gte, Operand::One(v)) => ConditionOp::Ge(encode(v)?),
        (Operator::BeginsWith, Operand::One(Value::Str(prefix)))
            if schema.field(field).is_none() =>
        {
            ConditionOp::BeginsWith(AttributeValue::S(json_text_prefix(prefix)))
        }
        (Operator::BeginsWith, Operand::One(v)) => ConditionOp::BeginsWith(encode(v)?),
        (Operator::Between, Operand::Two(lo, hi)) => ConditionOp::Between(encode(lo)?, encode(hi)?),
        (op, _) => {
            return Err(MapperError::UnsupportedOperator {
                field: field.to_owned(),
                operator: op.to_string(),
            });
        }
    };
    Ok(Condition::new(field, op))
}

/// Prefix of the JSON text an extra string attribute is stored as.
fn json_text_prefix(prefix: &str) -> String {
    let mut quoted = serde_json::Value::String(prefix.to_owned()).to_string();
    quoted.pop();
    quoted
}
