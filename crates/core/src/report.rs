//! Flat CSV export and re-import of the corpus table.

use crate::error::AnalysisError;
use crate::models::{CorpusTable, FeatureRecord, REPORT_COLUMNS};
use std::path::Path;
use tracing::info;

pub fn write_table(path: &Path, table: &CorpusTable) -> Result<(), AnalysisError> {
    let wrap = |source: csv::Error| AnalysisError::Report {
        path: path.to_path_buf(),
        source,
    };
    let mut wtr = csv::WriterBuilder::new()
        .has_headers(false)
        .from_path(path)
        .map_err(wrap)?;
    // header goes out even for an empty table
    wtr.write_record(REPORT_COLUMNS).map_err(wrap)?;
    for record in table {
        wtr.serialize(record).map_err(wrap)?;
    }
    wtr.flush().map_err(|e| wrap(e.into()))?;
    info!(path = %path.display(), rows = table.len(), "Report written");
    Ok(())
}

pub fn read_table(path: &Path) -> Result<CorpusTable, AnalysisError> {
    let wrap = |source: csv::Error| AnalysisError::Report {
        path: path.to_path_buf(),
        source,
    };
    let mut rdr = csv::Reader::from_path(path).map_err(wrap)?;
    rdr.deserialize::<FeatureRecord>()
        .map(|row| row.map_err(wrap))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::tests::record;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn header_row_follows_column_order() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("features.csv");
        write_table(&path, &vec![record("a.step")]).unwrap();
        let text = fs::read_to_string(&path).unwrap();
        let header = text.lines().next().unwrap();
        assert_eq!(
            header,
            "File Name,Total Faces,Curved Faces,Total Edges,Vertices,Bounding Box Volume,\
             Mean Curvature,Curvature Std Dev,Volume,Hole Count,size,ispart,\
             Complexity (Face/Edge),Complexity (Curvature),Criteria Met"
        );
    }

    #[test]
    fn empty_table_still_gets_a_header() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("features.csv");
        write_table(&path, &CorpusTable::new()).unwrap();
        let text = fs::read_to_string(&path).unwrap();
        assert_eq!(text.lines().count(), 1);
        assert!(text.starts_with("File Name,Total Faces,"));
        assert!(read_table(&path).unwrap().is_empty());
    }

    #[test]
    fn column_list_matches_serialized_record() {
        let mut wtr = csv::Writer::from_writer(vec![]);
        wtr.serialize(record("a.step")).unwrap();
        let text = String::from_utf8(wtr.into_inner().unwrap()).unwrap();
        assert_eq!(text.lines().next().unwrap(), REPORT_COLUMNS.join(","));
    }

    #[test]
    fn undetermined_part_and_nan_survive_reimport() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("features.csv");
        let mut odd = record("odd.step");
        odd.is_part = None;
        odd.mean_curvature = f64::NAN;
        odd.curvature_std_dev = f64::NAN;
        let mut scored = record("scored.step");
        scored.criteria_met = Some(6);
        write_table(&path, &vec![odd, scored.clone()]).unwrap();

        let table = read_table(&path).unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table[0].is_part, None);
        assert!(table[0].mean_curvature.is_nan());
        assert_eq!(table[0].criteria_met, None);
        assert_eq!(table[1], scored);
    }

    #[test]
    fn unwritable_report_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("missing").join("features.csv");
        assert!(matches!(
            write_table(&path, &vec![]),
            Err(AnalysisError::Report { .. })
        ));
    }
}
