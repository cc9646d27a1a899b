// THEORY:
// The `region` module owns every piece of rectangle arithmetic in the engine and
// the two partitioning steps the streaming drivers depend on:
//
// 1.  **Streaming strips**: the requested region is cut into horizontal bands of
//     whole lines. Only one strip is in flight at a time, which bounds memory.
// 2.  **Worker split**: each strip is cut again, one sub-region per worker slot.
//     Tall strips split along rows, short strips (fewer lines than workers) split
//     along columns so that a one-line strip still uses every worker.
//
// Both splits are exact covers: every pixel of the input lands in exactly one
// output region, no overlap, no gap. Some worker regions may be empty when there
// are more workers than pixels along the split axis. Empty regions contribute
// nothing and are simply skipped.

/// Default memory budget for one streaming strip when the granularity is `Auto`.
pub const AUTO_STRIP_BYTES: usize = 8 * 1024 * 1024;

/// An axis-aligned rectangle in image coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Region {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Region {
    pub const fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// The region at the origin covering a `width` x `height` image.
    pub const fn from_size(width: u32, height: u32) -> Self {
        Self::new(0, 0, width, height)
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// One past the last column, widened so that it cannot overflow.
    pub fn right(&self) -> u64 {
        self.x as u64 + self.width as u64
    }

    /// One past the last row.
    pub fn bottom(&self) -> u64 {
        self.y as u64 + self.height as u64
    }

    /// True if `other` lies entirely inside `self`. Empty regions are contained
    /// anywhere within the bounds of `self`.
    pub fn contains(&self, other: &Region) -> bool {
        other.x >= self.x
            && other.y >= self.y
            && other.right() <= self.right()
            && other.bottom() <= self.bottom()
    }
}

/// Granularity of the streaming strips.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StripSize {
    /// Derive the number of lines from `AUTO_STRIP_BYTES`.
    #[default]
    Auto,
    /// A fixed number of lines per strip. Zero is treated as one.
    Lines(u32),
}

impl StripSize {
    /// Resolves to a concrete line count for a region of `width` pixels with
    /// `bands` samples of `sample_bytes` each.
    pub fn lines_per_strip(&self, width: u32, bands: usize, sample_bytes: usize) -> u32 {
        match *self {
            StripSize::Lines(lines) => lines.max(1),
            StripSize::Auto => {
                let line_bytes = (width as usize)
                    .saturating_mul(bands.max(1))
                    .saturating_mul(sample_bytes.max(1))
                    .max(1);
                (AUTO_STRIP_BYTES / line_bytes).clamp(1, u32::MAX as usize) as u32
            }
        }
    }
}

/// Cuts `region` into consecutive strips of at most `lines` rows, top to bottom.
pub fn split_into_strips(region: &Region, lines: u32) -> Vec<Region> {
    if region.is_empty() {
        return Vec::new();
    }
    let lines = lines.max(1);
    let mut strips = Vec::with_capacity(region.height.div_ceil(lines) as usize);
    let mut offset = 0u32;
    while offset < region.height {
        let height = lines.min(region.height - offset);
        strips.push(Region::new(region.x, region.y + offset, region.width, height));
        offset += height;
    }
    strips
}

/// Cuts `strip` into exactly `workers` sub-regions (some possibly empty).
pub fn split_for_workers(strip: &Region, workers: usize) -> Vec<Region> {
    let workers = workers.max(1);
    if strip.height as usize >= workers {
        split_axis(strip.height, workers)
            .into_iter()
            .map(|(start, len)| Region::new(strip.x, strip.y + start, strip.width, len))
            .collect()
    } else {
        split_axis(strip.width, workers)
            .into_iter()
            .map(|(start, len)| Region::new(strip.x + start, strip.y, len, strip.height))
            .collect()
    }
}

/// Balanced partition of `0..extent` into `parts` (start, len) pairs. The first
/// `extent % parts` parts are one longer than the rest.
fn split_axis(extent: u32, parts: usize) -> Vec<(u32, u32)> {
    let parts_u64 = parts as u64;
    let base = extent as u64 / parts_u64;
    let remainder = extent as u64 % parts_u64;
    let mut start = 0u64;
    (0..parts_u64)
        .map(|i| {
            let len = base + u64::from(i < remainder);
            let piece = (start as u32, len as u32);
            start += len;
            piece
        })
        .collect()
}
