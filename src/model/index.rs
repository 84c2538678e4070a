/// Secondary index over one or more fields of an entity type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexDescriptor {
    pub(crate) name: String,
    pub(crate) fields: Vec<String>,
}

impl IndexDescriptor {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn fields(&self) -> &[String] {
        &self.fields
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSpec {
    pub name: Option<String>,
    pub fields: Vec<String>,
}

impl IndexSpec {
    pub fn new<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: None,
            fields: fields.into_iter().map(Into::into).collect(),
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub(crate) fn resolved_name(&self, type_name: &str) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| default_index_name(type_name, &self.fields))
    }
}

/// Sanitizes a string for use inside generated identifiers.
///
/// Converts non-alphanumeric characters to underscores and lowercases the result.
fn sanitize_identifier(input: &str) -> String {
    input
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() {
                ch.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect()
}

/// Generates a default index name.
///
/// Format: `idx_<type>_<field>[_<field>...]`
pub fn default_index_name(type_name: &str, fields: &[String]) -> String {
    let mut name = format!("idx_{}", sanitize_identifier(type_name));
    for field in fields {
        name.push('_');
        name.push_str(&sanitize_identifier(field));
    }
    name
}
