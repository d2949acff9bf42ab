/// One row of a table as text-encoded cells in column order.
///
/// Each cell holds the value exactly as the source rendered it, or [`None`] for SQL NULL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRow {
    values: Vec<Option<String>>,
}

impl TableRow {
    pub fn new(values: Vec<Option<String>>) -> Self {
        Self { values }
    }

    /// Returns the row values in table column order.
    pub fn values(&self) -> &[Option<String>] {
        &self.values
    }

    /// Consumes the row and returns its values in table column order.
    pub fn into_values(self) -> Vec<Option<String>> {
        self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl<S: Into<String>> FromIterator<Option<S>> for TableRow {
    fn from_iter<I: IntoIterator<Item = Option<S>>>(iter: I) -> Self {
        Self::new(iter.into_iter().map(|value| value.map(Into::into)).collect())
    }
}
