//! Page image decoding with bounded memory.
//!
//! [`PageDecoder`] turns the raw bytes of one archive member into an RGBA
//! raster no larger than a configured maximum dimension. Oversized JPEG scans
//! (by far the most common comic page format) are decoded at a reduced DCT
//! scale, and oversized non-interlaced PNGs are streamed row by row into a
//! box-filtered raster of the target size; neither ever allocates the
//! full-resolution image.
//!
//! Everything else (WebP, GIF, BMP, interlaced PNG, and pages that need no
//! scaling) is decoded at full resolution and then resized, so it is bounded
//! by a separate allocation ceiling instead
//! ([`PageDecoder::with_max_decode_bytes`]). Pages over the ceiling fail with
//! [`ErrorKind::TooLarge`].

pub mod error;

use crate::error::{Error, ErrorKind, Result};
use exn::{OptionExt, ResultExt};
use image::imageops::FilterType;
use image::{DynamicImage, ImageError, ImageFormat, ImageReader, Limits, Rgba, RgbaImage};
use jpeg_decoder::PixelFormat;
use std::io::Cursor;
use tracing::instrument;

/// Default ceiling for a full-resolution decode: an 8192×8192 RGBA raster.
pub const DEFAULT_MAX_DECODE_BYTES: u64 = 256 * 1024 * 1024;

const PLACEHOLDER_WIDTH: u32 = 800;
const PLACEHOLDER_HEIGHT: u32 = 1200;
const PLACEHOLDER_BACKGROUND: Rgba<u8> = Rgba([0x44, 0x44, 0x44, 0xFF]);
const PLACEHOLDER_MARK: Rgba<u8> = Rgba([0xFF, 0x00, 0x00, 0xFF]);

/// A decoded page, always 8-bit RGBA.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DecodedPage {
    image: RgbaImage,
}

impl DecodedPage {
    pub fn new(image: RgbaImage) -> Self {
        Self { image }
    }

    /// Neutral dark grey page with a red band across the middle, for callers
    /// to show in place of a page that failed to read or decode.
    pub fn placeholder() -> Self {
        let band = (PLACEHOLDER_HEIGHT / 2 - 4)..(PLACEHOLDER_HEIGHT / 2 + 4);
        let image = RgbaImage::from_fn(PLACEHOLDER_WIDTH, PLACEHOLDER_HEIGHT, |_, y| {
            if band.contains(&y) { PLACEHOLDER_MARK } else { PLACEHOLDER_BACKGROUND }
        });
        Self { image }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Row-major RGBA bytes.
    pub fn pixels(&self) -> &[u8] {
        self.image.as_raw()
    }

    pub fn image(&self) -> &RgbaImage {
        &self.image
    }

    pub fn into_image(self) -> RgbaImage {
        self.image
    }

    /// Estimated resident size in bytes: `width * height * 4`.
    pub fn footprint(&self) -> usize {
        self.image.width() as usize * self.image.height() as usize * 4
    }

    /// Encode as PNG, e.g. for writing a cover thumbnail to disk.
    pub fn encode_png(&self) -> Result<Vec<u8>> {
        let mut buffer = Cursor::new(Vec::new());
        self.image.write_to(&mut buffer, ImageFormat::Png).or_raise(|| ErrorKind::Encode)?;
        Ok(buffer.into_inner())
    }
}

/// Decodes page bytes to an RGBA raster that fits within a square box of
/// `max_dimension` pixels, keeping the aspect ratio.
#[derive(Clone, Copy, Debug)]
pub struct PageDecoder {
    max_dimension: u32,
    max_decode_bytes: u64,
}

impl PageDecoder {
    pub fn new(max_dimension: u32) -> Self {
        Self { max_dimension: max_dimension.max(1), max_decode_bytes: DEFAULT_MAX_DECODE_BYTES }
    }

    /// Cap the memory a full-resolution decode may allocate.
    #[must_use]
    pub fn with_max_decode_bytes(mut self, max_decode_bytes: u64) -> Self {
        self.max_decode_bytes = max_decode_bytes;
        self
    }

    #[instrument(level = "debug", skip(self, bytes), fields(bytes = bytes.len(), format, width, height))]
    pub fn decode(&self, bytes: &[u8]) -> Result<DecodedPage> {
        let format = image::guess_format(bytes).or_raise(|| ErrorKind::Unsupported)?;
        let (width, height) = ImageReader::with_format(Cursor::new(bytes), format).into_dimensions().map_err(image_error)?;
        let span = tracing::Span::current();
        span.record("format", tracing::field::debug(format));
        span.record("width", width);
        span.record("height", height);

        let target = fit_within(width, height, self.max_dimension);
        let scaled = match format {
            _ if target == (width, height) => None,
            ImageFormat::Jpeg => Some(decode_jpeg_scaled(bytes, target)?),
            ImageFormat::Png => decode_png_scaled(bytes, target)?,
            _ => None,
        };
        let decoded = match scaled {
            Some(decoded) => decoded,
            None => self.decode_full(bytes, format, width, height)?,
        };
        let decoded = match (decoded.width(), decoded.height()) == target {
            true => decoded,
            false => decoded.resize_exact(target.0, target.1, FilterType::Triangle),
        };
        Ok(DecodedPage::new(decoded.into_rgba8()))
    }

    fn decode_full(&self, bytes: &[u8], format: ImageFormat, width: u32, height: u32) -> Result<DynamicImage> {
        let raster = u64::from(width) * u64::from(height) * 4;
        if raster > self.max_decode_bytes {
            tracing::debug!(raster, ceiling = self.max_decode_bytes, "page too large to decode at full resolution");
            exn::bail!(ErrorKind::TooLarge);
        }
        let mut reader = ImageReader::with_format(Cursor::new(bytes), format);
        let mut limits = Limits::default();
        limits.max_image_width = Some(width);
        limits.max_image_height = Some(height);
        limits.max_alloc = Some(self.max_decode_bytes);
        reader.limits(limits);
        reader.decode().map_err(image_error)
    }
}

/// Largest size with the same aspect ratio that fits in `max` × `max`.
fn fit_within(width: u32, height: u32, max: u32) -> (u32, u32) {
    if width <= max && height <= max {
        return (width, height);
    }
    let long = u64::from(width.max(height));
    let scale = |side: u32| -> u32 {
        let scaled = (u64::from(side) * u64::from(max) + long / 2) / long;
        u32::try_from(scaled).unwrap_or(max).clamp(1, max)
    };
    (scale(width), scale(height))
}

fn image_error(err: ImageError) -> Error {
    let kind = match &err {
        ImageError::Unsupported(_) => ErrorKind::Unsupported,
        ImageError::Limits(_) => ErrorKind::TooLarge,
        _ => ErrorKind::Corrupt,
    };
    exn::Exn::from(err).raise(kind)
}

/// Decode a JPEG at the smallest DCT scale that still covers `target`.
fn decode_jpeg_scaled(bytes: &[u8], target: (u32, u32)) -> Result<DynamicImage> {
    let mut decoder = jpeg_decoder::Decoder::new(Cursor::new(bytes));
    decoder.read_info().or_raise(|| ErrorKind::Corrupt)?;
    let requested_width = u16::try_from(target.0).unwrap_or(u16::MAX);
    let requested_height = u16::try_from(target.1).unwrap_or(u16::MAX);
    decoder.scale(requested_width, requested_height).or_raise(|| ErrorKind::Corrupt)?;
    let raw = decoder.decode().or_raise(|| ErrorKind::Corrupt)?;
    let info = decoder.info().ok_or_raise(|| ErrorKind::Corrupt)?;
    let (width, height) = (u32::from(info.width), u32::from(info.height));
    tracing::trace!(width, height, "decoded JPEG at reduced scale");

    let rgba: Vec<u8> = match info.pixel_format {
        PixelFormat::L8 => raw.iter().flat_map(|&l| [l, l, l, 0xFF]).collect(),
        PixelFormat::L16 => raw.chunks_exact(2).flat_map(|px| [px[0], px[0], px[0], 0xFF]).collect(),
        PixelFormat::RGB24 => raw.chunks_exact(3).flat_map(|px| [px[0], px[1], px[2], 0xFF]).collect(),
        // Adobe-style inverted CMYK, as emitted by the decoder.
        PixelFormat::CMYK32 => raw
            .chunks_exact(4)
            .flat_map(|px| {
                let k = u16::from(px[3]);
                let channel = |c: u8| ((u16::from(c) * k) / 255) as u8;
                [channel(px[0]), channel(px[1]), channel(px[2]), 0xFF]
            })
            .collect(),
        #[allow(unreachable_patterns)]
        _ => exn::bail!(ErrorKind::Unsupported),
    };
    let image = RgbaImage::from_raw(width, height, rgba).ok_or_raise(|| ErrorKind::Corrupt)?;
    Ok(DynamicImage::ImageRgba8(image))
}

/// Stream a non-interlaced PNG into a `target` sized raster, averaging every
/// source pixel into the target pixel it lands in. Only one row of sums is
/// live next to the output. `None` for interlaced images, whose rows arrive
/// in passes.
fn decode_png_scaled(bytes: &[u8], target: (u32, u32)) -> Result<Option<DynamicImage>> {
    let mut decoder = png::Decoder::new(Cursor::new(bytes));
    decoder.set_transformations(png::Transformations::normalize_to_color8());
    let mut reader = decoder.read_info().map_err(png_error)?;
    let info = reader.info();
    let (width, height) = (info.width, info.height);
    if info.interlaced {
        return Ok(None);
    }
    let channels = match reader.output_color_type().0 {
        png::ColorType::Grayscale => 1,
        png::ColorType::GrayscaleAlpha => 2,
        png::ColorType::Rgb => 3,
        png::ColorType::Rgba => 4,
        png::ColorType::Indexed => exn::bail!(ErrorKind::Unsupported),
    };

    let (target_width, target_height) = target;
    let mut output = RgbaImage::new(target_width, target_height);
    let mut sums = BoxRow::new(target_width);
    let mut row_y = 0;
    let mut y = 0;
    while let Some(row) = reader.next_row().map_err(png_error)? {
        let target_y = shrink(y, height, target_height);
        if target_y != row_y {
            sums.flush_into(&mut output, row_y);
            row_y = target_y;
        }
        for (x, pixel) in (0..width).zip(row.data().chunks_exact(channels)) {
            let rgba = match *pixel {
                [l] => [l, l, l, 0xFF],
                [l, a] => [l, l, l, a],
                [r, g, b] => [r, g, b, 0xFF],
                [r, g, b, a, ..] => [r, g, b, a],
                [] => continue,
            };
            sums.add(shrink(x, width, target_width), rgba);
        }
        y += 1;
    }
    sums.flush_into(&mut output, row_y);
    tracing::trace!(width = target_width, height = target_height, "streamed PNG at reduced size");
    Ok(Some(DynamicImage::ImageRgba8(output)))
}

/// Position in a `target` sized axis of `position` in a `source` sized one.
fn shrink(position: u32, source: u32, target: u32) -> u32 {
    let scaled = u64::from(position) * u64::from(target) / u64::from(source.max(1));
    u32::try_from(scaled).unwrap_or(u32::MAX).min(target.saturating_sub(1))
}

fn png_error(err: png::DecodingError) -> Error {
    let kind = match &err {
        png::DecodingError::LimitsExceeded => ErrorKind::TooLarge,
        _ => ErrorKind::Corrupt,
    };
    exn::Exn::from(err).raise(kind)
}

/// Per-channel sums for one output row.
struct BoxRow {
    sums: Vec<[u64; 4]>,
    counts: Vec<u64>,
}

impl BoxRow {
    fn new(width: u32) -> Self {
        let width = width as usize;
        Self { sums: vec![[0; 4]; width], counts: vec![0; width] }
    }

    fn add(&mut self, x: u32, pixel: [u8; 4]) {
        let x = x as usize;
        for (sum, channel) in self.sums[x].iter_mut().zip(pixel) {
            *sum += u64::from(channel);
        }
        self.counts[x] += 1;
    }

    fn flush_into(&mut self, output: &mut RgbaImage, y: u32) {
        for (x, (sum, count)) in (0..).zip(self.sums.iter_mut().zip(self.counts.iter_mut())) {
            if *count > 0 {
                let average = sum.map(|total| ((total + *count / 2) / *count) as u8);
                output.put_pixel(x, y, Rgba(average));
            }
            *sum = [0; 4];
            *count = 0;
        }
    }
}
