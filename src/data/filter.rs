use std::collections::BTreeSet;

use anyhow::{bail, Context, Result};

use super::loader::guess_metadata_type;
use super::model::{MetadataValue, RowId, SpectrumMatrix};
use crate::engine::{ClassificationResult, Label};

// ---------------------------------------------------------------------------
// Row selection by classification
// ---------------------------------------------------------------------------

/// The strong and weak halves of a matrix after classification.
#[derive(Debug, Clone)]
pub struct Partition {
    pub strong: SpectrumMatrix,
    pub weak: SpectrumMatrix,
}

/// Split `matrix` by the labels in `result`. Rows the result does not
/// mention land in neither half.
pub fn partition(matrix: &SpectrumMatrix, result: &ClassificationResult) -> Partition {
    Partition {
        strong: matrix.subset(&result.strong_ids()),
        weak: matrix.subset(&result.weak_ids()),
    }
}

/// Rows carrying `label` whose `column` metadata value is in `selected`.
///
/// An empty selection keeps every row with the label, so callers can narrow
/// a class down to e.g. one sample without special-casing "all".
pub fn labelled_rows(
    matrix: &SpectrumMatrix,
    result: &ClassificationResult,
    label: Label,
    column: &str,
    selected: &BTreeSet<MetadataValue>,
) -> Vec<RowId> {
    let wanted: BTreeSet<RowId> = result.ids_with(label).into_iter().collect();
    matrix
        .spectra()
        .iter()
        .filter(|sp| wanted.contains(&sp.id))
        .filter(|sp| {
            if selected.is_empty() {
                return true;
            }
            let value = sp.metadata.get(column).unwrap_or(&MetadataValue::Null);
            selected.contains(value)
        })
        .map(|sp| sp.id)
        .collect()
}

/// Metadata values of one column to keep, parsed from `COLUMN=VALUE` terms.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Selection {
    pub column: Option<String>,
    pub values: BTreeSet<MetadataValue>,
}

impl Selection {
    /// Every term must name the same column. Values are typed the way the
    /// loaders type metadata cells, so `n=3` matches an integer column.
    pub fn parse(terms: &[String]) -> Result<Self> {
        let mut selection = Selection::default();
        for term in terms {
            let (column, value) = term
                .split_once('=')
                .with_context(|| format!("selection '{term}' is not COLUMN=VALUE"))?;
            let column = column.trim();
            match &selection.column {
                Some(c) if c != column => {
                    bail!("selection mixes columns '{c}' and '{column}'")
                }
                Some(_) => {}
                None => selection.column = Some(column.to_string()),
            }
            selection.values.insert(guess_metadata_type(value.trim()));
        }
        Ok(selection)
    }

    /// Rows carrying `label` that pass the selection.
    pub fn rows(
        &self,
        matrix: &SpectrumMatrix,
        result: &ClassificationResult,
        label: Label,
    ) -> Vec<RowId> {
        let column = self.column.as_deref().unwrap_or_default();
        labelled_rows(matrix, result, label, column, &self.values)
    }
}
