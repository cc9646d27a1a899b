// THEORY:
// A `Tile` is the engine's only view of pixel data: a rectangular, multi-band block
// read from an image source for the duration of one strip. It is a "dumb" data
// container, like the pixel chunks it is modelled on, and knows nothing about
// statistics.
//
// Key architectural principles:
// 1.  **Pixel-interleaved layout**: samples are stored row-major, all bands of a
//     pixel adjacent (`[p0b0, p0b1, p1b0, p1b1, ...]`). This matches how
//     `image::ImageBuffer` stores its subpixels, so adapting an image buffer is a
//     plain copy.
// 2.  **Sources, not images**: the engine never holds a whole image. It holds an
//     `ImageSource` and asks it for one region at a time. `MemoryImage` is the
//     trivial source; `GeneratedImage` computes samples on demand and never
//     materializes anything beyond the requested tile.
// 3.  **Read failures are hard failures**: `read_region` returns a `Result` and
//     the drivers abort the pass on the first error.
// 4.  **Position in the pass**: a tile remembers the extent of the image it was
//     cut from, so a pixel's scan index is the same however the pass was split
//     into strips and worker regions.

use crate::core_modules::region::Region;
use crate::core_modules::sample::Sample;
use crate::error::{Result, StatsError};
use image::{DynamicImage, ImageBuffer, Pixel};

/// A rectangular block of multi-band samples.
#[derive(Debug, Clone, PartialEq)]
pub struct Tile<T> {
    /// Where the tile sits in image coordinates.
    region: Region,
    /// Samples per pixel.
    bands: usize,
    /// Row-major, pixel-interleaved samples.
    data: Vec<T>,
    /// The image the tile belongs to; scan indices are relative to it.
    extent: Region,
}

impl<T: Sample> Tile<T> {
    pub fn new(region: Region, bands: usize, data: Vec<T>) -> Result<Self> {
        let expected = region.area() as usize * bands;
        if data.len() != expected {
            return Err(StatsError::TileSize {
                region,
                bands,
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            region,
            bands,
            data,
            extent: region,
        })
    }

    /// Places the tile inside `extent`. Without it, the tile is its own extent.
    pub fn within(mut self, extent: Region) -> Self {
        self.extent = extent;
        self
    }

    pub fn region(&self) -> Region {
        self.region
    }

    pub fn bands(&self) -> usize {
        self.bands
    }

    pub fn samples(&self) -> &[T] {
        &self.data
    }

    /// Iterates over pixels in scan order; each item holds one sample per band.
    pub fn pixels(&self) -> std::slice::ChunksExact<'_, T> {
        self.data.chunks_exact(self.bands.max(1))
    }

    /// Row-major index of the `pixel`-th pixel of this tile within its extent.
    pub fn scan_index(&self, pixel: usize) -> u64 {
        let width = self.region.width.max(1) as usize;
        let row = (pixel / width) as u64 + self.region.y.saturating_sub(self.extent.y) as u64;
        let col = (pixel % width) as u64 + self.region.x.saturating_sub(self.extent.x) as u64;
        row * self.extent.width as u64 + col
    }
}

/// Anything the engine can read pixel regions from.
pub trait ImageSource<T: Sample>: Send + Sync {
    /// The full image extent. Requested regions must lie inside it.
    fn extent(&self) -> Region;

    fn band_count(&self) -> usize;

    /// Reads one region. Blocks until the data is available.
    fn read_region(&self, region: &Region) -> Result<Tile<T>>;
}

/// An image held entirely in memory.
#[derive(Debug, Clone)]
pub struct MemoryImage<T> {
    width: u32,
    height: u32,
    bands: usize,
    data: Vec<T>,
}

impl<T: Sample> MemoryImage<T> {
    pub fn new(width: u32, height: u32, bands: usize, data: Vec<T>) -> Result<Self> {
        if bands == 0 {
            return Err(StatsError::NoBands);
        }
        let region = Region::from_size(width, height);
        let expected = region.area() as usize * bands;
        if data.len() != expected {
            return Err(StatsError::TileSize {
                region,
                bands,
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            width,
            height,
            bands,
            data,
        })
    }

    /// Builds a single-band or multi-band image from a per-sample function.
    pub fn from_fn<F>(width: u32, height: u32, bands: usize, f: F) -> Result<Self>
    where
        F: Fn(u32, u32, usize) -> T,
    {
        let mut data = Vec::with_capacity(width as usize * height as usize * bands);
        for y in 0..height {
            for x in 0..width {
                for band in 0..bands {
                    data.push(f(x, y, band));
                }
            }
        }
        Self::new(width, height, bands, data)
    }

    /// Copies an `image` buffer; the pixel's channels become bands.
    pub fn from_image_buffer<P>(buffer: &ImageBuffer<P, Vec<T>>) -> Result<Self>
    where
        P: Pixel<Subpixel = T>,
        T: image::Primitive,
    {
        Self::new(
            buffer.width(),
            buffer.height(),
            P::CHANNEL_COUNT as usize,
            buffer.as_raw().clone(),
        )
    }
}

impl MemoryImage<f64> {
    /// Widens any decoded image to `f64` while keeping raw sample values
    /// (an 8-bit 200 stays 200.0, it is not rescaled to [0, 1]).
    pub fn from_dynamic(image: &DynamicImage) -> Result<Self> {
        fn widen<S: Sample>(raw: &[S]) -> Vec<f64> {
            raw.iter().map(|s| s.to_f64_lossy()).collect()
        }

        let (bands, data) = match image {
            DynamicImage::ImageLuma8(b) => (1, widen(b.as_raw())),
            DynamicImage::ImageLumaA8(b) => (2, widen(b.as_raw())),
            DynamicImage::ImageRgb8(b) => (3, widen(b.as_raw())),
            DynamicImage::ImageRgba8(b) => (4, widen(b.as_raw())),
            DynamicImage::ImageLuma16(b) => (1, widen(b.as_raw())),
            DynamicImage::ImageLumaA16(b) => (2, widen(b.as_raw())),
            DynamicImage::ImageRgb16(b) => (3, widen(b.as_raw())),
            DynamicImage::ImageRgba16(b) => (4, widen(b.as_raw())),
            DynamicImage::ImageRgb32F(b) => (3, widen(b.as_raw())),
            DynamicImage::ImageRgba32F(b) => (4, widen(b.as_raw())),
            other => (4, widen(other.to_rgba32f().as_raw())),
        };
        Self::new(image.width(), image.height(), bands, data)
    }
}

impl<T: Sample> ImageSource<T> for MemoryImage<T> {
    fn extent(&self) -> Region {
        Region::from_size(self.width, self.height)
    }

    fn band_count(&self) -> usize {
        self.bands
    }

    fn read_region(&self, region: &Region) -> Result<Tile<T>> {
        let extent = self.extent();
        if !extent.contains(region) {
            return Err(StatsError::RegionOutOfBounds {
                region: *region,
                extent,
            });
        }
        let row_len = region.width as usize * self.bands;
        let mut data = Vec::with_capacity(region.height as usize * row_len);
        for y in region.y..region.y + region.height {
            let start = (y as usize * self.width as usize + region.x as usize) * self.bands;
            data.extend_from_slice(&self.data[start..start + row_len]);
        }
        Tile::new(*region, self.bands, data)
    }
}

/// A procedural image: samples are computed per request and never stored.
pub struct GeneratedImage<T, F> {
    extent: Region,
    bands: usize,
    generator: F,
    _sample: std::marker::PhantomData<fn() -> T>,
}

impl<T, F> GeneratedImage<T, F>
where
    T: Sample,
    F: Fn(u32, u32, usize) -> T + Send + Sync,
{
    pub fn new(width: u32, height: u32, bands: usize, generator: F) -> Self {
        Self {
            extent: Region::from_size(width, height),
            bands,
            generator,
            _sample: std::marker::PhantomData,
        }
    }
}

impl<T, F> ImageSource<T> for GeneratedImage<T, F>
where
    T: Sample,
    F: Fn(u32, u32, usize) -> T + Send + Sync,
{
    fn extent(&self) -> Region {
        self.extent
    }

    fn band_count(&self) -> usize {
        self.bands
    }

    fn read_region(&self, region: &Region) -> Result<Tile<T>> {
        if !self.extent.contains(region) {
            return Err(StatsError::RegionOutOfBounds {
                region: *region,
                extent: self.extent,
            });
        }
        let mut data = Vec::with_capacity(region.area() as usize * self.bands);
        for y in region.y..region.y + region.height {
            for x in region.x..region.x + region.width {
                for band in 0..self.bands {
                    data.push((self.generator)(x, y, band));
                }
            }
        }
        Tile::new(*region, self.bands, data)
    }
}
