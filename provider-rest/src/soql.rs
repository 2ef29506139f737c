//! SOQL query builder

/// Builds `SELECT ... FROM ... [WHERE ...] [ORDER BY ...] [LIMIT n]`.
///
/// Nested relationship subqueries are plain select items:
///
/// ```ignore
/// let children = SoqlBuilder::new("Contacts").select(["Id", "LastModifiedDate"]).build();
/// let soql = SoqlBuilder::new("Account")
///     .select(["Id", "LastModifiedDate"])
///     .select_subquery(children)
///     .where_in("Id", &ids)
///     .build();
/// ```
#[derive(Debug, Clone, Default)]
pub struct SoqlBuilder {
    from: String,
    fields: Vec<String>,
    conditions: Vec<String>,
    order_by: Option<String>,
    limit: Option<u32>,
}

impl SoqlBuilder {
    pub fn new(from: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            ..Self::default()
        }
    }

    pub fn select<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for field in fields {
            let field = field.into();
            if !self.fields.contains(&field) {
                self.fields.push(field);
            }
        }
        self
    }

    /// Adds `(subquery)` as a select item.
    pub fn select_subquery(mut self, subquery: impl AsRef<str>) -> Self {
        self.fields.push(format!("({})", subquery.as_ref()));
        self
    }

    /// Raw condition, AND-ed with the others.
    pub fn where_clause(mut self, condition: impl Into<String>) -> Self {
        self.conditions.push(condition.into());
        self
    }

    /// `field IN ('a','b')`
    pub fn where_in(self, field: &str, values: &[String]) -> Self {
        let condition = format!("{} IN ({})", field, quote_list(values));
        self.where_clause(condition)
    }

    pub fn order_by(mut self, clause: impl Into<String>) -> Self {
        self.order_by = Some(clause.into());
        self
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn build(&self) -> String {
        let mut soql = format!("SELECT {} FROM {}", self.fields.join(", "), self.from);
        if !self.conditions.is_empty() {
            soql.push_str(" WHERE ");
            soql.push_str(&self.conditions.join(" AND "));
        }
        if let Some(order) = &self.order_by {
            soql.push_str(" ORDER BY ");
            soql.push_str(order);
        }
        if let Some(limit) = self.limit {
            soql.push_str(&format!(" LIMIT {}", limit));
        }
        soql
    }
}

/// Escape a string literal for SOQL.
pub fn quote(value: &str) -> String {
    let escaped = value.replace('\\', "\\\\").replace('\'', "\\'");
    format!("'{}'", escaped)
}

/// Comma-separated quoted literals.
pub fn quote_list(values: &[String]) -> String {
    values
        .iter()
        .map(|v| quote(v))
        .collect::<Vec<_>>()
        .join(",")
}
