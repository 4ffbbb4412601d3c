// Command line utility for running the scan-traj pipeline

use anyhow::{Context, Error};
use clap::{value_parser, Arg, ArgAction, Command};
use flate2::write::GzEncoder;
use flate2::Compression;
use log::info;
use ndarray::prelude::*;
use scan_traj::io::{
    load_dataset, save_checkpoint, write_cells, write_graph_test, write_markers, write_modules,
};
use scan_traj::pseudotime::{OrderCellsParams, RootSelection};
use scan_traj::{run_pipeline, PipelineConfig, ReductionMethod};
use std::fs::{create_dir_all, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

pub fn main() -> Result<(), Error> {
    let matches = Command::new("scan-traj-cmd")
        .about("Cluster cells, learn a trajectory and order cells in pseudotime")
        .arg(
            Arg::new("MATRIX")
                .help("Count matrix in Matrix Market format, genes x cells, optionally gzipped")
                .long("matrix")
                .required(true)
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("CELLS")
                .help("TSV cell table, identifiers in the first column")
                .long("cells")
                .required(true)
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("GENES")
                .help("TSV gene table, identifiers and short names in the first two columns")
                .long("genes")
                .required(true)
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("CONFIG")
                .help("JSON pipeline configuration; omitted fields take their defaults")
                .long("config")
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("OUT_DIR")
                .help("Output directory")
                .short('o')
                .long("out-dir")
                .default_value(".")
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("ROOT_CELLS")
                .help("Comma separated identifiers of the pseudotime root cells")
                .long("root-cells")
                .value_delimiter(',')
                .conflicts_with("ROOT_COLUMN"),
        )
        .arg(
            Arg::new("ROOT_COLUMN")
                .help("Cell metadata column marking the earliest cells")
                .long("root-column")
                .requires("ROOT_VALUE"),
        )
        .arg(
            Arg::new("ROOT_VALUE")
                .help("Value of --root-column marking the earliest cells")
                .long("root-value")
                .requires("ROOT_COLUMN"),
        )
        .arg(
            Arg::new("THREADS")
                .help("Worker threads for marker finding and the graph test")
                .short('t')
                .long("threads")
                .default_value("1")
                .value_parser(value_parser!(usize)),
        )
        .arg(
            Arg::new("CHECKPOINT")
                .help("Also write the final dataset as gzipped JSON")
                .long("checkpoint")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("VERBOSE")
                .help("Debug logging")
                .short('v')
                .long("verbose")
                .action(ArgAction::SetTrue),
        )
        .get_matches();

    let level = if matches.get_flag("VERBOSE") {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };
    env_logger::Builder::from_default_env()
        .filter_level(level)
        .format_target(false)
        .init();

    let out_dir: &PathBuf = matches.get_one("OUT_DIR").context("missing output directory")?;
    let threads: usize = *matches.get_one("THREADS").context("missing thread count")?;

    let mut cfg: PipelineConfig = match matches.get_one::<PathBuf>("CONFIG") {
        Some(path) => {
            let file = File::open(path).with_context(|| path.display().to_string())?;
            serde_json::from_reader(file).with_context(|| format!("parsing {}", path.display()))?
        }
        None => PipelineConfig::default(),
    };
    cfg = cfg.with_workers(threads);

    if let Some(cells) = matches.get_many::<String>("ROOT_CELLS") {
        cfg.order_cells = Some(OrderCellsParams {
            roots: RootSelection::Cells(cells.cloned().collect()),
        });
    } else if let (Some(column), Some(value)) = (
        matches.get_one::<String>("ROOT_COLUMN"),
        matches.get_one::<String>("ROOT_VALUE"),
    ) {
        cfg.order_cells = Some(OrderCellsParams {
            roots: RootSelection::Annotation {
                column: column.clone(),
                value: value.clone(),
            },
        });
    }

    let path = |key: &str| -> Result<&PathBuf, Error> {
        matches
            .get_one::<PathBuf>(key)
            .with_context(|| format!("missing {key}"))
    };
    let ds = load_dataset(path("MATRIX")?, path("CELLS")?, path("GENES")?)?;

    create_dir_all(out_dir).with_context(|| out_dir.display().to_string())?;
    let out = run_pipeline(ds, &cfg)?;
    let ds = &out.dataset;

    write_markers(&out.markers, out_dir.join("markers.csv"))?;
    write_graph_test(&out.graph_test, out_dir.join("graph_test.csv"))?;
    write_modules(&out.modules, out_dir.join("modules.csv"))?;
    write_cells(ds, cfg.cluster.reduction, out_dir.join("cells.csv"))?;

    for method in [ReductionMethod::Pca, ReductionMethod::Umap, ReductionMethod::Tsne] {
        if let Some(embedding) = ds.embedding(method) {
            array_to_csv(embedding.view(), out_dir.join(format!("{}.csv.gz", method.to_string().to_lowercase())))?;
        }
    }
    if let Some(graph) = ds.principal_graph() {
        array_to_csv(graph.nodes.view(), out_dir.join("principal_nodes.csv.gz"))?;
    }
    if matches.get_flag("CHECKPOINT") {
        save_checkpoint(ds, out_dir.join("dataset.json.gz"))?;
    }

    info!(
        "wrote {} marker rows, {} graph test rows and {} modules to {}",
        out.markers.len(),
        out.graph_test.len(),
        out.modules.num_modules(),
        out_dir.display()
    );
    Ok(())
}

pub fn array_to_csv(array: ArrayView2<f64>, path: impl AsRef<Path>) -> Result<(), Error> {
    let path = path.as_ref();
    let file = File::create(path).with_context(|| path.display().to_string())?;
    let mut writer = BufWriter::new(GzEncoder::new(file, Compression::default()));
    let num_cols = array.shape()[1];
    for row in array.axis_iter(Axis(0)) {
        for (i, entry) in row.iter().enumerate() {
            write!(writer, "{}", *entry)?;
            if i + 1 < num_cols {
                write!(writer, ",")?;
            }
        }
        writeln!(writer)?;
    }
    writer.into_inner()?.finish()?;
    Ok(())
}
