use crate::dataset::{CellMetadata, Dataset, ExpressionMatrix, GeneMetadata, ReductionMethod};
use crate::error::PipelineError;
use crate::graph_test::GraphTestTable;
use crate::markers::MarkerTable;
use crate::modules::GeneModuleTable;
use anyhow::{bail, format_err, Context, Error};
use flate2::bufread::MultiGzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use log::info;
use serde::Serialize;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::path::Path;

/// Open `path` for reading, decompressing it when the name ends in `.gz`.
fn open(path: &Path) -> Result<Box<dyn BufRead>, Error> {
    let file = BufReader::new(File::open(path).with_context(|| path.display().to_string())?);
    if path.extension().is_some_and(|e| e == "gz") {
        Ok(Box::new(BufReader::new(MultiGzDecoder::new(file))))
    } else {
        Ok(Box::new(file))
    }
}

/// `(rows, cols)` and the 0-based `(row, col, value)` entries of a Matrix Market coordinate file
fn read_mtx(path: &Path) -> Result<((usize, usize), Vec<(usize, usize, f64)>), Error> {
    let mut reader = open(path)?;
    let mut line = String::new();
    let mut shape: Option<(usize, usize)> = None;
    let mut entries = Vec::new();

    loop {
        line.clear();
        if reader.read_line(&mut line)? == 0 {
            break;
        }
        if line.starts_with('%') || line.trim().is_empty() {
            continue;
        }
        let mut data = line.split_whitespace();
        match shape {
            None => {
                let nrow = data.next().ok_or_else(|| format_err!("no NROW"))?.parse::<usize>()?;
                let ncol = data.next().ok_or_else(|| format_err!("no NCOL"))?.parse::<usize>()?;
                let nnz = data.next().ok_or_else(|| format_err!("no NNZ"))?.parse::<usize>()?;
                shape = Some((nrow, ncol));
                entries.reserve(nnz);
            }
            Some(_) => {
                let row = data.next().ok_or_else(|| format_err!("missing ROW"))?.parse::<usize>()?;
                let col = data.next().ok_or_else(|| format_err!("missing COL"))?.parse::<usize>()?;
                let val = data.next().ok_or_else(|| format_err!("missing VAL"))?.parse::<f64>()?;
                if row == 0 || col == 0 {
                    bail!("Matrix Market indices start at 1, found ({row}, {col})");
                }
                entries.push((row - 1, col - 1, val));
            }
        }
    }

    let Some(shape) = shape else { bail!("no matrix found in {}", path.display()) };
    Ok((shape, entries))
}

/// Header and records of a tab-separated table with a header row
fn read_tsv(path: &Path) -> Result<(Vec<String>, Vec<Vec<String>>), Error> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(true)
        .from_reader(open(path)?);
    let header = reader
        .headers()
        .with_context(|| path.display().to_string())?
        .iter()
        .map(String::from)
        .collect::<Vec<_>>();
    let mut records = Vec::new();
    for record in reader.records() {
        let record = record.with_context(|| path.display().to_string())?;
        records.push(record.iter().map(String::from).collect());
    }
    Ok((header, records))
}

/// Column `j` of `records`
fn column(records: &[Vec<String>], j: usize) -> Vec<String> {
    records.iter().map(|r| r[j].clone()).collect()
}

/// Load a dataset from a Matrix Market count matrix (genes × cells) and TSV cell and gene tables.
/// The first column of each table holds the identifiers; the second column of the gene table
/// holds the short names. Remaining columns become annotation columns. Files ending in `.gz` are
/// decompressed.
pub fn load_dataset(matrix: impl AsRef<Path>, cells: impl AsRef<Path>, genes: impl AsRef<Path>) -> Result<Dataset, Error> {
    let (cells, genes) = (cells.as_ref(), genes.as_ref());

    let (cell_header, cell_records) = read_tsv(cells)?;
    if cell_header.is_empty() {
        bail!("{} has no columns", cells.display());
    }
    let cell_ids = column(&cell_records, 0);
    let mut cell_meta = CellMetadata::new(cell_ids.clone());
    for (j, name) in cell_header.iter().enumerate().skip(1) {
        cell_meta = cell_meta.with_column(name.as_str(), column(&cell_records, j))?;
    }

    let (gene_header, gene_records) = read_tsv(genes)?;
    if gene_header.is_empty() {
        bail!("{} has no columns", genes.display());
    }
    let gene_ids = column(&gene_records, 0);
    let short_names = if gene_header.len() > 1 {
        column(&gene_records, 1)
    } else {
        gene_ids.clone()
    };
    let mut gene_meta = GeneMetadata::new(gene_ids.clone(), short_names)?;
    for (j, name) in gene_header.iter().enumerate().skip(2) {
        gene_meta = gene_meta.with_column(name.as_str(), column(&gene_records, j))?;
    }

    let path = matrix.as_ref();
    let ((rows, cols), entries) = read_mtx(path)?;
    if (rows, cols) != (gene_ids.len(), cell_ids.len()) {
        return Err(PipelineError::Alignment(format!(
            "{} is {rows} x {cols} but there are {} genes and {} cells",
            path.display(),
            gene_ids.len(),
            cell_ids.len()
        ))
        .into());
    }
    info!("loaded {} entries of a {rows} x {cols} matrix from {}", entries.len(), path.display());

    let matrix = ExpressionMatrix::from_triplets(entries, gene_ids, cell_ids)?;
    Ok(Dataset::new(matrix, cell_meta, gene_meta)?)
}

/// Write the whole dataset, including every derived field, as gzipped JSON.
pub fn save_checkpoint(ds: &Dataset, path: impl AsRef<Path>) -> Result<(), Error> {
    let path = path.as_ref();
    let file = File::create(path).with_context(|| path.display().to_string())?;
    let mut gz = GzEncoder::new(BufWriter::new(file), Compression::default());
    serde_json::to_writer(&mut gz, ds)?;
    gz.finish()?.flush()?;
    Ok(())
}

/// Read a dataset written by [`save_checkpoint`]. The dataset goes through the same alignment
/// checks as a freshly assembled one.
pub fn load_checkpoint(path: impl AsRef<Path>) -> Result<Dataset, Error> {
    let path = path.as_ref();
    let file = BufReader::new(File::open(path).with_context(|| path.display().to_string())?);
    let mut json = String::new();
    MultiGzDecoder::new(file).read_to_string(&mut json)?;
    let ds: Dataset =
        serde_json::from_str(&json).with_context(|| format!("parsing checkpoint {}", path.display()))?;
    ds.validate()?;
    Ok(ds)
}

fn write_rows<T: Serialize>(rows: impl IntoIterator<Item = T>, path: &Path) -> Result<(), Error> {
    let mut writer = csv::Writer::from_path(path).with_context(|| path.display().to_string())?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}

/// Write a marker table as CSV.
pub fn write_markers(table: &MarkerTable, path: impl AsRef<Path>) -> Result<(), Error> {
    write_rows(table.rows(), path.as_ref())
}

/// Write a graph test table as CSV.
pub fn write_graph_test(table: &GraphTestTable, path: impl AsRef<Path>) -> Result<(), Error> {
    write_rows(table.rows(), path.as_ref())
}

/// Write a gene module table as CSV.
pub fn write_modules(table: &GeneModuleTable, path: impl AsRef<Path>) -> Result<(), Error> {
    write_rows(table.rows(), path.as_ref())
}

#[derive(Serialize)]
struct CellRow<'a> {
    cell_id: &'a str,
    cluster: Option<usize>,
    partition: Option<usize>,
    pseudotime: Option<f64>,
}

/// Write the per-cell results (cluster and partition on `reduction`, pseudotime) as CSV. Fields
/// that have not been computed are left empty; unreachable cells have pseudotime `inf`.
pub fn write_cells(ds: &Dataset, reduction: ReductionMethod, path: impl AsRef<Path>) -> Result<(), Error> {
    let clusters = ds.clusters(reduction);
    let pseudotime = ds.pseudotime();
    let rows = ds.cells().ids().iter().enumerate().map(|(c, id)| CellRow {
        cell_id: id,
        cluster: clusters.map(|cl| cl.clusters[c]),
        partition: clusters.map(|cl| cl.partitions[c]),
        pseudotime: pseudotime.map(|p| p.get(c)),
    });
    write_rows(rows, path.as_ref())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::test::two_population_dataset;
    use std::fs;

    const MTX: &str = "%%MatrixMarket matrix coordinate integer general\n\
                       % genes x cells\n\
                       3 2 4\n\
                       1 1 5\n\
                       2 1 1\n\
                       3 2 7\n\
                       1 2 2\n";

    fn write_inputs(dir: &Path, gz: bool) -> (std::path::PathBuf, std::path::PathBuf, std::path::PathBuf) {
        let mtx = if gz {
            let p = dir.join("matrix.mtx.gz");
            let mut enc = GzEncoder::new(File::create(&p).unwrap(), Compression::default());
            enc.write_all(MTX.as_bytes()).unwrap();
            enc.finish().unwrap();
            p
        } else {
            let p = dir.join("matrix.mtx");
            fs::write(&p, MTX).unwrap();
            p
        };
        let cells = dir.join("cells.tsv");
        fs::write(&cells, "barcode\tsample\nAAC\ts1\nGGT\ts2\n").unwrap();
        let genes = dir.join("genes.tsv");
        fs::write(&genes, "id\tname\tkind\nENSG1\tSOX2\tTF\nENSG2\tPAX6\tTF\nENSG3\tACTB\tother\n").unwrap();
        (mtx, cells, genes)
    }

    #[test]
    fn load_plain_and_gzipped() {
        let dir = tempfile::tempdir().unwrap();
        for gz in [false, true] {
            let (mtx, cells, genes) = write_inputs(dir.path(), gz);
            let ds = load_dataset(&mtx, &cells, &genes).unwrap();
            assert_eq!((ds.n_genes(), ds.n_cells()), (3, 2));
            assert_eq!(ds.matrix().get(0, 0), 5.0);
            assert_eq!(ds.matrix().get(0, 1), 2.0);
            assert_eq!(ds.matrix().get(2, 1), 7.0);
            assert_eq!(ds.matrix().get(1, 1), 0.0);
            assert_eq!(ds.cells().column("sample").unwrap(), &["s1", "s2"]);
            assert_eq!(ds.genes().short_names(), &["SOX2", "PAX6", "ACTB"]);
            assert_eq!(ds.genes().column("kind").unwrap()[2], "other");
        }
    }

    #[test]
    fn shape_mismatch_is_an_alignment_error() {
        let dir = tempfile::tempdir().unwrap();
        let (mtx, cells, _) = write_inputs(dir.path(), false);
        let genes = dir.path().join("two_genes.tsv");
        fs::write(&genes, "id\tname\nENSG1\tSOX2\nENSG2\tPAX6\n").unwrap();
        let err = load_dataset(&mtx, &cells, &genes).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PipelineError>(),
            Some(PipelineError::Alignment(_))
        ));
    }

    #[test]
    fn checkpoint_restores_dataset() {
        let dir = tempfile::tempdir().unwrap();
        let ds = two_population_dataset(20, 30, 2);
        let path = dir.path().join("ds.json.gz");
        save_checkpoint(&ds, &path).unwrap();
        assert_eq!(load_checkpoint(&path).unwrap(), ds);
    }

    fn write_json_checkpoint(value: &serde_json::Value, path: &Path) {
        let mut gz = GzEncoder::new(File::create(path).unwrap(), Compression::default());
        serde_json::to_writer(&mut gz, value).unwrap();
        gz.finish().unwrap();
    }

    #[test]
    fn tampered_checkpoint_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let ds = two_population_dataset(20, 30, 2);
        let original = serde_json::to_value(&ds).unwrap();
        let path = dir.path().join("ds.json.gz");

        // metadata rows no longer follow the matrix columns
        let mut swapped = original.clone();
        let ids = swapped["cells"]["ids"].as_array_mut().unwrap();
        ids.swap(0, 1);
        write_json_checkpoint(&swapped, &path);
        let err = load_checkpoint(&path).unwrap_err();
        assert!(matches!(err.downcast_ref::<PipelineError>(), Some(PipelineError::Alignment(_))), "{err}");

        // duplicate identifiers, consistently in matrix and metadata
        let mut dup = original.clone();
        dup["matrix"]["gene_ids"][1] = dup["matrix"]["gene_ids"][0].clone();
        dup["genes"]["ids"][1] = dup["genes"]["ids"][0].clone();
        write_json_checkpoint(&dup, &path);
        let err = load_checkpoint(&path).unwrap_err();
        assert!(matches!(err.downcast_ref::<PipelineError>(), Some(PipelineError::Alignment(_))), "{err}");

        // a metadata column of the wrong length
        let mut short = original;
        short["cells"]["columns"]["population"].as_array_mut().unwrap().pop();
        write_json_checkpoint(&short, &path);
        let err = load_checkpoint(&path).unwrap_err();
        assert!(matches!(err.downcast_ref::<PipelineError>(), Some(PipelineError::Alignment(_))), "{err}");
    }

    #[test]
    fn cell_table() {
        let dir = tempfile::tempdir().unwrap();
        let ds = two_population_dataset(4, 10, 2);
        let path = dir.path().join("cells.csv");
        write_cells(&ds, ReductionMethod::Umap, &path).unwrap();
        let text = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "cell_id,cluster,partition,pseudotime");
        assert_eq!(lines[1], "cell0,,,");
        assert_eq!(lines.len(), 5);
    }
}
