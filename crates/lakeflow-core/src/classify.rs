use crate::model::{NamingSettings, TableKind};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TableClass {
    Raw,
    Optimized,
    /// Catalogs may hold unrelated tables; these are skipped, never errors.
    Unrecognized,
}

impl TableClass {
    pub fn kind(&self) -> Option<TableKind> {
        match self {
            TableClass::Raw => Some(TableKind::Raw),
            TableClass::Optimized => Some(TableKind::Optimized),
            TableClass::Unrecognized => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableClassifier {
    raw_suffix: String,
    optimized_suffix: String,
}

impl TableClassifier {
    pub fn new(raw_suffix: impl Into<String>, optimized_suffix: impl Into<String>) -> Self {
        Self {
            raw_suffix: raw_suffix.into(),
            optimized_suffix: optimized_suffix.into(),
        }
    }

    pub fn from_naming(naming: &NamingSettings) -> Self {
        Self::new(naming.raw_suffix.clone(), naming.optimized_suffix.clone())
    }

    /// Raw is checked before optimized, so a name matching both is raw.
    pub fn classify(&self, table_name: &str) -> TableClass {
        if table_name.ends_with(&self.raw_suffix) {
            TableClass::Raw
        } else if table_name.ends_with(&self.optimized_suffix) {
            TableClass::Optimized
        } else {
            TableClass::Unrecognized
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classifier() -> TableClassifier {
        TableClassifier::from_naming(&NamingSettings::default())
    }

    #[test]
    fn classifies_by_suffix() {
        let c = classifier();
        assert_eq!(c.classify("traffic_offences_data_csv"), TableClass::Raw);
        assert_eq!(c.classify("traffic_offences_data_parquet"), TableClass::Optimized);
        assert_eq!(c.classify("unrelated_table"), TableClass::Unrecognized);
        // Only the naming convention counts, not the dataset it belongs to.
        assert_eq!(
            c.classify("traffic_camera_locations_lookup_parquet"),
            TableClass::Unrecognized
        );
        assert_eq!(c.classify(""), TableClass::Unrecognized);
    }

    #[test]
    fn raw_wins_when_both_suffixes_match() {
        // Both suffixes match any name ending in "_parquet".
        let c = TableClassifier::new("parquet", "_parquet");
        assert_eq!(c.classify("events_parquet"), TableClass::Raw);
        for _ in 0..10 {
            assert_eq!(c.classify("events_parquet"), TableClass::Raw);
        }

        let c = TableClassifier::new("_parquet", "parquet");
        assert_eq!(c.classify("events_parquet"), TableClass::Raw);
        assert_eq!(c.classify("eventsparquet"), TableClass::Optimized);
    }

    #[test]
    fn only_the_trailing_suffix_counts() {
        let c = classifier();
        assert_eq!(c.classify("data_csv_data_parquet"), TableClass::Optimized);
        assert_eq!(c.classify("data_parquet_data_csv"), TableClass::Raw);
        assert_eq!(c.classify("DATA_CSV"), TableClass::Unrecognized);
        assert_eq!(TableClass::Unrecognized.kind(), None);
        assert_eq!(TableClass::Optimized.kind(), Some(TableKind::Optimized));
    }
}
