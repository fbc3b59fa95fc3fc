//! Tree-top detection and tall-tree clustering from a LiDAR point cloud.
//!
//! Usage:
//!   cargo run --release -- forest.las
//!   cargo run --release -- forest.laz --z-min 180 --z-max 220 --eps 12 --min-pts 5
//!   cargo run --release -- chm.tif --config site.json --out-dir results
//!
//! Produces, in the output directory:
//!   trees.csv, tall_trees.csv, tall_trees.geojson, height_histogram.csv, canopy.tif

use anyhow::{Context, Result};
use clap::Parser;
use log::info;
use std::fs;
use std::path::{Path, PathBuf};
use treetops::{
    export::{self, CsvExporter, GeoJsonExporter, TreeExporter},
    pipeline::{self, PipelineConfig, PipelineOutput},
    read_las,
};

// ==========================================================================
// CLI (clap)
// ==========================================================================

#[derive(Parser, Debug)]
#[command(
    name = "treetops",
    version,
    about = "Tree tops and tall-tree clusters from a LiDAR point cloud",
    after_help = "Produces: trees.csv, tall_trees.csv, tall_trees.geojson, height_histogram.csv, canopy.tif"
)]
struct Cli {
    /// Point cloud (.las / .laz) or canopy height model (.tif)
    #[arg(value_name = "INPUT")]
    input: PathBuf,

    /// JSON config file; flags below override its values
    #[arg(long, value_name = "config.json")]
    config: Option<PathBuf>,

    /// EPSG code of the input's projected CRS
    #[arg(long)]
    epsg: Option<u32>,

    /// Elevation band lower bound (m)
    #[arg(long)]
    z_min: Option<f64>,

    /// Elevation band upper bound (m)
    #[arg(long)]
    z_max: Option<f64>,

    /// Canopy raster cell size (m)
    #[arg(long)]
    cell_size: Option<f64>,

    /// Local-maximum window width in cells (odd, >= 3)
    #[arg(long)]
    window: Option<usize>,

    /// Minimum tree-top height (m)
    #[arg(long)]
    min_height: Option<f64>,

    /// Tall-tree percentile in (0, 1)
    #[arg(long)]
    percentile: Option<f64>,

    /// Clustering radius (m)
    #[arg(long)]
    eps: Option<f64>,

    /// Clustering minimum neighbourhood size
    #[arg(long)]
    min_pts: Option<usize>,

    /// Histogram bin width (m)
    #[arg(long, default_value_t = 1.0)]
    bin_width: f64,

    /// Output directory
    #[arg(long, short, default_value = "treetops_out")]
    out_dir: PathBuf,
}

impl Cli {
    fn config(&self) -> Result<PipelineConfig> {
        let mut cfg = match &self.config {
            Some(path) => PipelineConfig::from_json_file(path)
                .with_context(|| format!("reading config '{}'", path.display()))?,
            None => PipelineConfig::default(),
        };
        if let Some(v) = self.epsg {
            cfg.crs_epsg = v;
        }
        if let Some(v) = self.z_min {
            cfg.z_min = v;
        }
        if let Some(v) = self.z_max {
            cfg.z_max = v;
        }
        if let Some(v) = self.cell_size {
            cfg.cell_size = v;
        }
        if let Some(v) = self.window {
            cfg.window = v;
        }
        if let Some(v) = self.min_height {
            cfg.min_height = Some(v);
        }
        if let Some(v) = self.percentile {
            cfg.percentile = v;
        }
        if let Some(v) = self.eps {
            cfg.eps = v;
        }
        if let Some(v) = self.min_pts {
            cfg.min_pts = v;
        }
        cfg.validate().context("invalid configuration")?;
        Ok(cfg)
    }
}

// ==========================================================================
// Run
// ==========================================================================

fn is_raster(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()).map(|e| e.to_ascii_lowercase()),
        Some(ref e) if e == "tif" || e == "tiff"
    )
}

fn analyse(cli: &Cli, cfg: &PipelineConfig) -> Result<PipelineOutput> {
    let crs = cfg.crs()?;
    if is_raster(&cli.input) {
        println!("1. Loading canopy raster '{}'...", cli.input.display());
        let chm = export::load_geotiff(&cli.input, crs)
            .with_context(|| format!("loading '{}'", cli.input.display()))?;
        Ok(pipeline::run_on_canopy(chm, cfg)?)
    } else {
        println!("1. Loading point cloud '{}'...", cli.input.display());
        let cloud = read_las(&cli.input, crs)
            .with_context(|| format!("loading '{}'", cli.input.display()))?;
        println!("   {} points ({crs})", cloud.len());
        Ok(pipeline::run(&cloud, cfg)?)
    }
}

fn write_outputs(out: &PipelineOutput, dir: &Path, bin_width: f64) -> Result<()> {
    fs::create_dir_all(dir).with_context(|| format!("creating '{}'", dir.display()))?;

    CsvExporter
        .export(&out.records(), &dir.join("trees.csv"))
        .context("writing trees.csv")?;
    let tall = out.tall_records();
    CsvExporter
        .export(&tall, &dir.join("tall_trees.csv"))
        .context("writing tall_trees.csv")?;
    GeoJsonExporter { source: out.crs }
        .export(&tall, &dir.join("tall_trees.geojson"))
        .context("writing tall_trees.geojson")?;

    let heights: Vec<f64> = out.candidates.iter().map(|t| t.z).collect();
    let bins = export::height_histogram(&heights, bin_width)?;
    export::write_histogram_csv(&bins, &dir.join("height_histogram.csv"))
        .context("writing height_histogram.csv")?;

    if let Some(chm) = &out.canopy {
        export::write_geotiff(chm, &dir.join("canopy.tif")).context("writing canopy.tif")?;
    }
    Ok(())
}

fn print_summary(out: &PipelineOutput) {
    println!("3. Summary:");
    if let Some(stage) = out.empty_at {
        println!("   ! {stage} produced no output");
    }
    if out.input_points > 0 {
        println!(
            "   Points      : {} kept of {}",
            out.filtered_points, out.input_points
        );
    }
    if let Some(chm) = &out.canopy {
        println!(
            "   Canopy      : {} x {} cells, {} populated",
            chm.ncol,
            chm.nrow,
            chm.valid_count()
        );
        if let Some((lo, hi)) = chm.value_range() {
            println!("   Canopy z    : {:.1} to {:.1} m", lo, hi);
        }
    }
    println!("   Trees       : {}", out.candidates.len());
    if out.candidates.is_empty() {
        return;
    }

    let hs: Vec<f64> = out.candidates.iter().map(|t| t.z).collect();
    let h_min = hs.iter().cloned().fold(f64::INFINITY, f64::min);
    let h_max = hs.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let h_mean = hs.iter().sum::<f64>() / hs.len() as f64;
    println!(
        "   Heights     : min={:.1}  mean={:.1}  max={:.1} m",
        h_min, h_mean, h_max
    );
    if let Some(th) = out.threshold {
        println!("   Threshold   : {:.2} m → {} tall trees", th, out.tall_trees.len());
    }
    println!(
        "   Clusters    : {} ({} tall trees are noise)",
        out.clustering.n_clusters,
        out.clustering.noise_count()
    );
    for s in out.clustering.summaries(&out.tall_xy()) {
        println!(
            "     #{:<3} {:>3} trees around ({:.1}, {:.1})",
            s.label, s.size, s.cx, s.cy
        );
    }

    let records = out.records();
    let mut sorted: Vec<_> = records.iter().collect();
    sorted.sort_by(|a, b| b.z.total_cmp(&a.z));
    println!("\n   Top 10 tallest trees:");
    println!(
        "   {:>5}  {:>12}  {:>12}  {:>7}  {:>7}",
        "ID", "X", "Y", "Z (m)", "Cluster"
    );
    println!("   {}", "─".repeat(52));
    for t in sorted.iter().take(10) {
        println!(
            "   {:>5}  {:>12.2}  {:>12.2}  {:>7.1}  {:>7}",
            t.id, t.x, t.y, t.z, t.cluster
        );
    }
}

// ==========================================================================
// Main
// ==========================================================================

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();
    let cfg = cli.config()?;

    println!("══════════════════════════════════════════════════════════");
    println!("  treetops — tree tops and tall-tree clusters");
    println!("══════════════════════════════════════════════════════════\n");

    let t0 = std::time::Instant::now();
    let out = analyse(&cli, &cfg)?;
    info!("analysis finished in {:.2}s", t0.elapsed().as_secs_f64());

    println!("2. Writing results to '{}'", cli.out_dir.display());
    write_outputs(&out, &cli.out_dir, cli.bin_width)?;
    print_summary(&out);

    println!("\n══════════════════════════════════════════════════════════");
    println!("  ✓ Done — {} trees, {} tall", out.candidates.len(), out.tall_trees.len());
    println!("══════════════════════════════════════════════════════════");
    Ok(())
}
