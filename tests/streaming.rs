use raster_stats::core_modules::bin_count::{bin_counts, scott_bin_count};
use raster_stats::core_modules::histogram_accumulator::HistogramReduction;
use raster_stats::parallel_pipeline::{ParallelPipeline, PassStatus};
use raster_stats::pipeline::{StreamingConfig, StreamingPipeline};
use raster_stats::{
    BinSpec, GeneratedImage, ImageSource, MemoryImage, MinMax, NoData, PassState, Region,
    StatisticsReduction, StatsError, StripSize, Tile,
};
use std::sync::Arc;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn pipeline(threads: usize, strip: StripSize) -> StreamingPipeline {
    StreamingPipeline::new(StreamingConfig::default().with_threads(threads).with_strip(strip)).unwrap()
}

/// A deterministic, irregular two-band test image.
fn scrambled(width: u32, height: u32) -> MemoryImage<i32> {
    MemoryImage::from_fn(width, height, 2, |x, y, band| {
        let h = (x.wrapping_mul(2_654_435_761) ^ y.wrapping_mul(40_503)).wrapping_add(band as u32 * 97);
        (h % 2001) as i32 - 1000
    })
    .unwrap()
}

const LAYOUTS: [(usize, StripSize); 9] = [
    (1, StripSize::Auto),
    (1, StripSize::Lines(1)),
    (1, StripSize::Lines(50)),
    (2, StripSize::Auto),
    (2, StripSize::Lines(1)),
    (2, StripSize::Lines(50)),
    (8, StripSize::Auto),
    (8, StripSize::Lines(1)),
    (8, StripSize::Lines(50)),
];

#[test]
fn results_do_not_depend_on_threads_or_strips() {
    init_logging();
    let image = scrambled(37, 123);

    let mut reference = None;
    for (threads, strip) in LAYOUTS {
        let pipeline = pipeline(threads, strip);

        let mut min_max = MinMax::accumulator::<i32>();
        let bounds = pipeline.run(&mut min_max, &image).unwrap().clone();

        let mut histogram = HistogramReduction::from_min_max(&bounds, 64).accumulator::<i32>();
        let histograms = pipeline.run(&mut histogram, &image).unwrap().clone();

        let outcome = (bounds, histograms);
        match &reference {
            Some(expected) => assert_eq!(&outcome, expected, "{} threads, {:?}", threads, strip),
            None => reference = Some(outcome),
        }
    }
}

#[test]
fn statistics_of_integral_data_do_not_depend_on_layout() {
    let image = scrambled(29, 41);
    let mut reference = None;
    for (threads, strip) in LAYOUTS {
        let mut acc = StatisticsReduction::default().accumulator::<i32>();
        let stats = pipeline(threads, strip).run(&mut acc, &image).unwrap().clone();
        let cross = stats.cross_band();
        assert_eq!(cross.relevant_pixels, 29 * 41);
        assert_eq!(cross.covariance(0, 1), cross.covariance(1, 0));
        assert_eq!(cross.mean[0], stats[0].mean);
        match &reference {
            Some(expected) => assert_eq!(&stats, expected, "{} threads, {:?}", threads, strip),
            None => reference = Some(stats),
        }
    }
}

#[test]
fn sub_sampled_histogram_does_not_depend_on_layout() {
    let image = MemoryImage::from_fn(7, 9, 1, |x, y, _| (y * 7 + x) as u8).unwrap();
    let layouts = LAYOUTS.iter().copied().chain([(3, StripSize::Lines(2))]);
    for (threads, strip) in layouts {
        let mut acc = HistogramReduction::uniform(1, BinSpec::new(4, 0.0, 62.0))
            .with_sub_sampling(3)
            .accumulator::<u8>();
        let histograms = pipeline(threads, strip).run(&mut acc, &image).unwrap();
        assert_eq!(histograms[0].frequencies(), &[6, 5, 5, 5], "{} threads, {:?}", threads, strip);
        assert_eq!(histograms[0].total_frequency(), 21);
    }
}

#[test]
fn repeated_passes_do_not_double_count() {
    let image = scrambled(16, 16);
    let pipeline = pipeline(4, StripSize::Lines(5));
    let mut acc = HistogramReduction::uniform(2, BinSpec::new(10, -1000.0, 1000.0)).accumulator::<i32>();

    let first = pipeline.run(&mut acc, &image).unwrap().clone();
    let second = pipeline.run(&mut acc, &image).unwrap().clone();
    assert_eq!(first, second);
    assert_eq!(second[0].total_frequency(), 256);
    assert_eq!(second[1].total_frequency(), 256);
}

#[test]
fn accumulation_is_additive_over_disjoint_regions() {
    let image = scrambled(20, 30);
    let top = Region::new(0, 0, 20, 12);
    let bottom = Region::new(0, 12, 20, 18);

    let mut split_min_max = MinMax::accumulator::<i32>();
    split_min_max.reset(2, 2).unwrap();
    split_min_max.threaded_accumulate(&image, &top, 0).unwrap();
    split_min_max.threaded_accumulate(&image, &bottom, 1).unwrap();

    let mut whole_min_max = MinMax::accumulator::<i32>();
    whole_min_max.reset(1, 2).unwrap();
    whole_min_max.threaded_accumulate(&image, &image.extent(), 0).unwrap();
    assert_eq!(split_min_max.merge().unwrap(), whole_min_max.merge().unwrap());

    let reduction = HistogramReduction::uniform(2, BinSpec::new(7, -1000.0, 1000.0));
    let mut split_histogram = reduction.clone().accumulator::<i32>();
    split_histogram.reset(3, 2).unwrap();
    split_histogram.threaded_accumulate(&image, &bottom, 2).unwrap();
    split_histogram.threaded_accumulate(&image, &top, 0).unwrap();

    let mut whole_histogram = reduction.accumulator::<i32>();
    whole_histogram.reset(1, 2).unwrap();
    whole_histogram.threaded_accumulate(&image, &image.extent(), 0).unwrap();
    assert_eq!(split_histogram.merge().unwrap(), whole_histogram.merge().unwrap());
}

#[test]
fn no_data_exclusion_can_be_switched_off() {
    let image = MemoryImage::from_fn(6, 6, 1, |x, y, _| if (x + y) % 3 == 0 { 0u8 } else { (x * 10 + y) as u8 })
        .unwrap();
    let pipeline = pipeline(3, StripSize::Lines(2));

    let mut acc = MinMax::accumulator_with_no_data(NoData::enabled(0u8));
    let with_no_data = pipeline.run(&mut acc, &image).unwrap().clone();
    assert_eq!(with_no_data.counts(), &[24]);
    assert_eq!(with_no_data.min(), &[1]);

    acc.set_no_data(NoData::disabled()).unwrap();
    let without = pipeline.run(&mut acc, &image).unwrap();
    assert_eq!(without.counts(), &[36]);
    assert_eq!(without.min(), &[0]);
}

#[test]
fn histogram_total_matches_pixel_count() {
    let image = scrambled(33, 17);
    let pipeline = pipeline(8, StripSize::Lines(4));
    let mut min_max = MinMax::accumulator::<i32>();
    let bounds = pipeline.run(&mut min_max, &image).unwrap().clone();
    for bins in [1, 2, 3, 255, 4096] {
        let mut acc = HistogramReduction::from_min_max(&bounds, bins).accumulator::<i32>();
        let histograms = pipeline.run(&mut acc, &image).unwrap();
        for histogram in histograms {
            assert_eq!(histogram.total_frequency(), 33 * 17, "{} bins", bins);
        }
    }
}

#[test]
fn two_band_image_splits_evenly_into_two_bins() {
    // Both bands hold the pixel index 0..15 in scan order.
    let image = MemoryImage::from_fn(4, 4, 2, |x, y, _| (y * 4 + x) as u8).unwrap();
    let pipeline = pipeline(2, StripSize::Lines(1));

    let mut min_max = MinMax::accumulator::<u8>();
    let bounds = pipeline.run(&mut min_max, &image).unwrap().clone();
    assert_eq!(bounds.bounds(0), Some((0, 15)));
    assert_eq!(bounds.bounds(1), Some((0, 15)));

    let mut acc = HistogramReduction::from_min_max(&bounds, 2).accumulator::<u8>();
    let histograms = pipeline.run(&mut acc, &image).unwrap();
    for histogram in histograms {
        assert_eq!(histogram.frequencies(), &[8, 8]);
    }
}

#[test]
fn column_pattern_over_fixed_bounds() {
    let image = MemoryImage::from_fn(4, 4, 2, |x, _, _| x as u8).unwrap();
    let mut acc = HistogramReduction::uniform(2, BinSpec::new(2, 0.0, 3.0)).accumulator::<u8>();
    let histograms = pipeline(4, StripSize::Auto).run(&mut acc, &image).unwrap();
    assert_eq!(histograms[0].frequencies(), &[8, 8]);
    assert_eq!(histograms[1].frequencies(), &[8, 8]);
}

#[test]
fn scott_rule_feeds_the_histogram_pass() {
    let image = GeneratedImage::new(100, 100, 1, |x: u32, y: u32, _: usize| ((x * 7 + y * 13) % 100) as f32);
    let pipeline = pipeline(4, StripSize::Lines(16));

    let mut min_max = MinMax::accumulator::<f32>();
    let bounds = pipeline.run(&mut min_max, &image).unwrap().clone();
    let mut statistics = StatisticsReduction::default().accumulator::<f32>();
    let stats = pipeline.run(&mut statistics, &image).unwrap().clone();

    let bins = bin_counts(stats.bands(), &bounds);
    assert_eq!(
        bins[0],
        scott_bin_count(10_000, stats[0].std_dev, 0.0, 99.0)
    );
    assert!(bins[0] > 1);

    let mut histogram = HistogramReduction::from_min_max_with_bins(&bounds, &bins).accumulator::<f32>();
    let histograms = pipeline.run(&mut histogram, &image).unwrap();
    assert_eq!(histograms[0].bin_count(), bins[0]);
    assert_eq!(histograms[0].total_frequency(), 10_000);
}

#[test]
fn degenerate_bands_get_a_single_bin() {
    let image = MemoryImage::from_fn(5, 5, 2, |_, _, band| if band == 0 { 9u16 } else { 0 }).unwrap();
    let pipeline = pipeline(2, StripSize::Auto);

    let mut min_max = MinMax::accumulator_with_no_data(NoData::enabled(0u16));
    let bounds = pipeline.run(&mut min_max, &image).unwrap().clone();
    let mut statistics = StatisticsReduction::default()
        .accumulator::<u16>()
        .with_no_data(NoData::enabled(0));
    let stats = pipeline.run(&mut statistics, &image).unwrap().clone();

    assert_eq!(bin_counts(stats.bands(), &bounds), vec![1, 1]);

    let mut histogram = HistogramReduction::from_min_max(&bounds, 32)
        .accumulator::<u16>()
        .with_no_data(NoData::enabled(0));
    let histograms = pipeline.run(&mut histogram, &image).unwrap();
    assert_eq!(histograms[0].frequencies(), &[25]);
    assert_eq!(histograms[1].total_frequency(), 0);
}

/// Fails every read that touches row `bad_row`.
struct FlakySource {
    inner: MemoryImage<u8>,
    bad_row: u32,
}

#[derive(Debug, thiserror::Error)]
#[error("sector unreadable")]
struct SectorError;

impl ImageSource<u8> for FlakySource {
    fn extent(&self) -> Region {
        self.inner.extent()
    }

    fn band_count(&self) -> usize {
        self.inner.band_count()
    }

    fn read_region(&self, region: &Region) -> raster_stats::Result<Tile<u8>> {
        if (region.y..region.y + region.height).contains(&self.bad_row) {
            return Err(StatsError::read(*region, SectorError));
        }
        self.inner.read_region(region)
    }
}

fn flaky() -> FlakySource {
    FlakySource {
        inner: MemoryImage::new(8, 8, 1, vec![1u8; 64]).unwrap(),
        bad_row: 5,
    }
}

#[test]
fn read_failure_aborts_the_pass() {
    init_logging();
    let source = flaky();
    let mut acc = MinMax::accumulator::<u8>();
    let err = pipeline(2, StripSize::Lines(2)).run(&mut acc, &source).unwrap_err();
    assert!(matches!(err, StatsError::Read { region, .. } if region.y <= 5));
    assert_eq!(acc.state(), PassState::Aborted);
    assert!(acc.result().is_none());
    assert!(matches!(acc.merge(), Err(StatsError::InvalidState { .. })));

    // A fresh pass over a readable region works again.
    let result = pipeline(2, StripSize::Lines(2))
        .run_region(&mut acc, &source, Region::new(0, 0, 8, 4))
        .unwrap();
    assert_eq!(result.counts(), &[32]);
}

#[test]
fn threaded_accumulate_read_failure_aborts() {
    let source = flaky();
    let mut acc = MinMax::accumulator::<u8>();
    acc.reset(2, 1).unwrap();
    acc.threaded_accumulate(&source, &Region::new(0, 0, 8, 2), 0).unwrap();
    assert!(acc.threaded_accumulate(&source, &Region::new(0, 4, 8, 2), 1).is_err());
    assert_eq!(acc.state(), PassState::Aborted);
}

#[tokio::test]
async fn async_driver_matches_blocking_driver() {
    init_logging();
    let image = Arc::new(scrambled(41, 29));
    let config = StreamingConfig::default()
        .with_threads(3)
        .with_strip(StripSize::Lines(7));

    let mut blocking = MinMax::accumulator::<i32>();
    let expected = StreamingPipeline::new(config.clone())
        .unwrap()
        .run(&mut blocking, image.as_ref())
        .unwrap()
        .clone();

    let pipeline = ParallelPipeline::new(config).unwrap();
    let mut completion = pipeline.subscribe();
    let mut acc = MinMax::accumulator::<i32>();
    let source: Arc<dyn ImageSource<i32>> = image;
    let result = pipeline.run(&mut acc, source).await.unwrap().clone();

    completion.wait().await.unwrap();
    assert_eq!(completion.status(), PassStatus::Complete);
    assert_eq!(result, expected);
}

#[tokio::test]
async fn async_read_failure_reaches_waiters() {
    let pipeline = ParallelPipeline::new(StreamingConfig::default().with_threads(4)).unwrap();
    let mut completion = pipeline.subscribe();
    let source: Arc<dyn ImageSource<u8>> = Arc::new(flaky());
    let mut acc = MinMax::accumulator::<u8>();

    let err = pipeline.run(&mut acc, source).await.unwrap_err();
    assert!(matches!(err, StatsError::Read { .. }));
    assert_eq!(acc.state(), PassState::Aborted);
    assert!(matches!(completion.wait().await, Err(StatsError::PassAborted(_))));
}
