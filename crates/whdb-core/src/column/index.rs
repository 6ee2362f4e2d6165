/// Índice adicional declarado por un replicator (además de los índices de
/// columna).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSpec {
    pub columns: Vec<String>,
    pub where_clause: Option<String>,
    pub unique: bool,
}

impl IndexSpec {
    pub fn new<I, S>(columns: I) -> Self
        where I: IntoIterator<Item = S>,
              S: Into<String>
    {
        Self { columns: columns.into_iter().map(Into::into).collect(),
               where_clause: None,
               unique: false }
    }

    pub fn where_clause(mut self, clause: impl Into<String>) -> Self {
        self.where_clause = Some(clause.into());
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }
}
