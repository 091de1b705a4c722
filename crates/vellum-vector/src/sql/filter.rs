//! Renders [`Filter`] predicates into parameterized SQL.

use super::quote_ident;
use crate::collection::Filter;
use crate::error::{VectorError, VectorResult};
use crate::mapping::{ColumnMapping, RecordMapping};
use crate::record::Value;

/// A rendered predicate and the values for its placeholders, in order.
#[derive(Debug)]
pub(crate) struct FilterSql<'a> {
    pub sql: String,
    pub binds: Vec<(&'a ColumnMapping, Value)>,
}

/// Renders `filter` with placeholders numbered from `first_parameter`.
///
/// # Errors
///
/// Returns [`VectorError::InvalidArgument`] for unknown fields, vector fields
/// and values that the field cannot hold.
pub(crate) fn render_filter<'a>(
    mapping: &'a RecordMapping,
    filter: &Filter,
    first_parameter: usize,
) -> VectorResult<FilterSql<'a>> {
    let mut renderer = Renderer {
        mapping,
        binds: Vec::new(),
        next: first_parameter,
    };
    let sql = renderer.render(filter)?;

    Ok(FilterSql {
        sql,
        binds: renderer.binds,
    })
}

struct Renderer<'a> {
    mapping: &'a RecordMapping,
    binds: Vec<(&'a ColumnMapping, Value)>,
    next: usize,
}

impl<'a> Renderer<'a> {
    fn render(&mut self, filter: &Filter) -> VectorResult<String> {
        match filter {
            Filter::Eq(field, Value::Null) | Filter::IsNull(field) => {
                let entry = self.field(field)?;
                Ok(format!("{} IS NULL", quote_ident(entry.column())))
            }
            Filter::Eq(field, value) => {
                let entry = self.field(field)?;
                let placeholder = self.push(entry, value)?;
                Ok(format!("{} = {placeholder}", quote_ident(entry.column())))
            }
            Filter::AnyOf(field, values) => {
                let entry = self.field(field)?;
                let column = quote_ident(entry.column());

                let mut placeholders = Vec::with_capacity(values.len());
                let mut matches_null = false;
                for value in values {
                    if value.is_null() {
                        matches_null = true;
                    } else {
                        placeholders.push(self.push(entry, value)?);
                    }
                }

                let mut alternatives = Vec::with_capacity(2);
                if !placeholders.is_empty() {
                    alternatives.push(format!("{column} IN ({})", placeholders.join(", ")));
                }
                if matches_null {
                    alternatives.push(format!("{column} IS NULL"));
                }

                Ok(match alternatives.len() {
                    0 => "FALSE".to_owned(),
                    1 => alternatives.remove(0),
                    _ => format!("({})", alternatives.join(" OR ")),
                })
            }
            Filter::And(filters) => {
                if filters.is_empty() {
                    return Ok("TRUE".to_owned());
                }
                let parts = filters
                    .iter()
                    .map(|filter| self.render(filter).map(|sql| format!("({sql})")))
                    .collect::<VectorResult<Vec<_>>>()?;
                Ok(parts.join(" AND "))
            }
        }
    }

    fn field(&self, name: &str) -> VectorResult<&'a ColumnMapping> {
        let entry = self
            .mapping
            .get(name)
            .ok_or_else(|| VectorError::invalid_argument(format!("unknown filter field {name}")))?;

        if entry.is_vector() {
            return Err(VectorError::invalid_argument(format!(
                "vector field {name} cannot be filtered on"
            )));
        }
        Ok(entry)
    }

    fn push(&mut self, entry: &'a ColumnMapping, value: &Value) -> VectorResult<String> {
        entry
            .check_value(value)
            .map_err(|err| VectorError::invalid_argument(format!("invalid filter: {err}")))?;

        let placeholder = format!("${}", self.next);
        self.next += 1;
        self.binds.push((entry, value.clone()));
        Ok(placeholder)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::ModelBuilder;
    use crate::schema::{DistanceFunction, FieldDefinition, SchemaDefinition, StorageType};

    fn mapping() -> RecordMapping {
        let definition = SchemaDefinition::new()
            .with_field(FieldDefinition::key("id", StorageType::Text))
            .with_field(FieldDefinition::data("genre", StorageType::Text))
            .with_field(FieldDefinition::data("year", StorageType::Integer))
            .with_field(FieldDefinition::vector("v", 2, DistanceFunction::Cosine));
        ModelBuilder::build(Some(&definition), None).unwrap()
    }

    #[test]
    fn test_render_eq_and_any_of() {
        let mapping = mapping();
        let filter = Filter::and([
            Filter::eq("genre", "philosophy"),
            Filter::any_of("year", [Value::from(1), Value::from(2), Value::Null]),
        ]);

        let rendered = render_filter(&mapping, &filter, 2).unwrap();
        assert_eq!(
            rendered.sql,
            "(\"genre\" = $2) AND ((\"year\" IN ($3, $4) OR \"year\" IS NULL))"
        );
        assert_eq!(rendered.binds.len(), 3);
        assert_eq!(rendered.binds[0].0.field(), "genre");
        assert_eq!(rendered.binds[2].1, Value::Integer(2));
    }

    #[test]
    fn test_render_degenerate_filters() {
        let mapping = mapping();

        let rendered = render_filter(&mapping, &Filter::any_of("genre", []), 2).unwrap();
        assert_eq!(rendered.sql, "FALSE");

        let rendered = render_filter(&mapping, &Filter::and([]), 2).unwrap();
        assert_eq!(rendered.sql, "TRUE");

        let rendered = render_filter(&mapping, &Filter::eq("genre", Value::Null), 2).unwrap();
        assert_eq!(rendered.sql, "\"genre\" IS NULL");
        assert!(rendered.binds.is_empty());
    }

    #[test]
    fn test_render_rejects_bad_fields() {
        let mapping = mapping();

        for filter in [
            Filter::eq("missing", 1),
            Filter::is_null("v"),
            Filter::eq("year", "recent"),
        ] {
            let err = render_filter(&mapping, &filter, 2).unwrap_err();
            assert!(matches!(err, VectorError::InvalidArgument(_)), "{filter:?}");
        }
    }
}
