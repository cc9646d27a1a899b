// Example runner: three streaming passes over one decoded image (min/max,
// statistics, histogram) followed by the display dynamics of every band.

use anyhow::Context;
use clap::Parser;
use raster_stats::core_modules::bin_count::bin_counts;
use raster_stats::core_modules::dynamics::{dynamics_ranges, validate_clip};
use raster_stats::parallel_pipeline::ParallelPipeline;
use raster_stats::pipeline::StreamingConfig;
use raster_stats::{
    HistogramReduction, ImageSource, MemoryImage, MinMax, NoData, StatisticsReduction, StripSize,
};
use std::path::PathBuf;
use std::sync::Arc;

/// Per-band min/max, statistics, histograms and stretch ranges of a raster image
#[derive(Parser, Debug)]
#[command(name = "raster_stats", long_about = None)]
struct Args {
    /// Image file to analyse
    image: PathBuf,

    /// Worker threads (defaults to the number of CPUs)
    #[arg(short = 't', long)]
    threads: Option<usize>,

    /// Lines per streaming strip (defaults to an 8 MiB budget per strip)
    #[arg(long)]
    lines_per_strip: Option<u32>,

    /// Sample value excluded from every pass
    #[arg(long)]
    no_data: Option<f64>,

    /// Histogram bins per band (defaults to Scott's rule)
    #[arg(long)]
    bins: Option<usize>,

    /// Count only every n-th pixel in the histogram pass
    #[arg(long, default_value_t = 1)]
    sub_sampling: usize,

    /// Fraction of the darkest samples cut from the stretch range
    #[arg(long, default_value_t = 0.02)]
    low_clip: f64,

    /// Fraction of the brightest samples cut from the stretch range
    #[arg(long, default_value_t = 0.02)]
    high_clip: f64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();
    validate_clip(args.low_clip, args.high_clip)?;

    let mut config = StreamingConfig::default();
    if let Some(threads) = args.threads {
        config = config.with_threads(threads);
    }
    if let Some(lines) = args.lines_per_strip {
        config = config.with_strip(StripSize::Lines(lines));
    }
    let no_data = args.no_data.map(NoData::enabled).unwrap_or_default();

    let decoded = image::open(&args.image)
        .with_context(|| format!("failed to open {}", args.image.display()))?;
    let source: Arc<dyn ImageSource<f64>> = Arc::new(MemoryImage::from_dynamic(&decoded)?);
    let extent = source.extent();
    println!(
        "{}: {}x{} pixels, {} bands",
        args.image.display(),
        extent.width,
        extent.height,
        source.band_count()
    );

    let pipeline = ParallelPipeline::new(config)?;

    let mut min_max = MinMax::accumulator_with_no_data(no_data);
    let bounds = pipeline.run(&mut min_max, Arc::clone(&source)).await?.clone();

    let mut statistics = StatisticsReduction::default()
        .accumulator()
        .with_no_data(no_data);
    let stats = pipeline.run(&mut statistics, Arc::clone(&source)).await?.clone();

    let bins = match args.bins {
        Some(bins) => vec![bins; bounds.bands()],
        None => bin_counts(stats.bands(), &bounds),
    };
    let mut histogram = HistogramReduction::from_min_max_with_bins(&bounds, &bins)
        .with_sub_sampling(args.sub_sampling)
        .accumulator()
        .with_no_data(no_data);
    let histograms = pipeline.run(&mut histogram, Arc::clone(&source)).await?;

    let fallback = args.no_data.unwrap_or(0.0);
    let ranges = dynamics_ranges(histograms, args.low_clip, args.high_clip, (fallback, fallback))?;

    for band in 0..bounds.bands() {
        match bounds.bounds(band) {
            Some((min, max)) => println!(
                "band {}: min {} max {} count {} mean {:.4} std_dev {:.4} bins {} stretch [{:.4}, {:.4}]",
                band,
                min,
                max,
                stats[band].count,
                stats[band].mean,
                stats[band].std_dev,
                histograms[band].bin_count(),
                ranges[band].0,
                ranges[band].1
            ),
            None => println!("band {}: no valid samples", band),
        }
    }

    let cross = stats.cross_band();
    if cross.bands > 1 && cross.relevant_pixels > 0 {
        println!(
            "covariance over {} pixels ({} excluded):",
            cross.relevant_pixels, cross.excluded_pixels
        );
        for row in cross.covariance.chunks(cross.bands) {
            let cells: Vec<String> = row.iter().map(|v| format!("{:.4}", v)).collect();
            println!("  [{}]", cells.join(", "));
        }
    }
    Ok(())
}
