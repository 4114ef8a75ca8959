//! Decodes still and animated images into an ordered frame timeline.

use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;

use image::codecs::gif::GifDecoder;
use image::codecs::png::PngDecoder;
use image::codecs::webp::WebPDecoder;
use image::{AnimationDecoder, Frame, ImageFormat, RgbaImage};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Image(#[from] image::ImageError),

    #[error("image contains no frames")]
    NoFrames,

    #[error("first frame has no renderable surface")]
    EmptyFirstFrame,
}

/// One decoded frame of a timeline.
#[derive(Debug, Clone)]
pub struct DecodedFrame {
    pub pixels: Arc<RgbaImage>,
    pub duration_ms: u32,
    pub index: usize,
}

impl DecodedFrame {
    pub fn is_renderable(&self) -> bool {
        self.pixels.width() > 0 && self.pixels.height() > 0
    }
}

/// A fully decoded image resource: every frame composited onto the canvas.
#[derive(Debug, Clone)]
pub struct AnimatedImage {
    frames: Vec<DecodedFrame>,
    loop_count: u32,
    canvas_size: (u32, u32),
}

impl AnimatedImage {
    pub fn open(path: &Path) -> Result<Self, DecodeError> {
        let bytes = std::fs::read(path)?;
        let decoded = Self::from_bytes(&bytes)?;
        debug!(
            path = %path.display(),
            frames = decoded.frames.len(),
            loop_count = decoded.loop_count,
            "decoded image"
        );
        Ok(decoded)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DecodeError> {
        let format = image::guess_format(bytes)?;
        let (frames, loop_count) = match format {
            ImageFormat::Gif => {
                let decoder = GifDecoder::new(Cursor::new(bytes))?;
                (decoder.into_frames().collect_frames()?, gif_loop_count(bytes))
            }
            ImageFormat::WebP => {
                let decoder = WebPDecoder::new(Cursor::new(bytes))?;
                if decoder.has_animation() {
                    (decoder.into_frames().collect_frames()?, webp_loop_count(bytes))
                } else {
                    (vec![still_frame(bytes)?], 0)
                }
            }
            ImageFormat::Png => {
                let decoder = PngDecoder::new(Cursor::new(bytes))?;
                if decoder.is_apng()? {
                    (decoder.apng()?.into_frames().collect_frames()?, apng_loop_count(bytes))
                } else {
                    (vec![still_frame(bytes)?], 0)
                }
            }
            _ => (vec![still_frame(bytes)?], 0),
        };

        Self::from_frames(frames, loop_count)
    }

    fn from_frames(frames: Vec<Frame>, loop_count: u32) -> Result<Self, DecodeError> {
        let frames: Vec<DecodedFrame> = frames
            .into_iter()
            .enumerate()
            .map(|(index, frame)| {
                let (numer, denom) = frame.delay().numer_denom_ms();
                let duration_ms = if denom == 0 { 0 } else { numer / denom };
                DecodedFrame {
                    pixels: Arc::new(frame.into_buffer()),
                    duration_ms,
                    index,
                }
            })
            .collect();

        let first = frames.first().ok_or(DecodeError::NoFrames)?;
        if !first.is_renderable() {
            return Err(DecodeError::EmptyFirstFrame);
        }
        let canvas_size = first.pixels.dimensions();

        Ok(Self {
            frames,
            loop_count,
            canvas_size,
        })
    }

    pub fn frames(&self) -> &[DecodedFrame] {
        &self.frames
    }

    pub fn frame(&self, index: usize) -> Option<&DecodedFrame> {
        self.frames.get(index)
    }

    /// The still asset shown before (or instead of) animation playback.
    pub fn first_frame(&self) -> &DecodedFrame {
        &self.frames[0]
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    /// Number of full cycles to play, 0 = forever.
    pub fn loop_count(&self) -> u32 {
        self.loop_count
    }

    pub fn is_animated(&self) -> bool {
        self.frames.len() > 1
    }

    pub fn canvas_size(&self) -> (u32, u32) {
        self.canvas_size
    }
}

fn still_frame(bytes: &[u8]) -> Result<Frame, DecodeError> {
    let image = image::load_from_memory(bytes)?.into_rgba8();
    Ok(Frame::new(image))
}

// GIF keeps its repeat count in the NETSCAPE2.0 extension. A missing extension
// means "play once"; a stored n means n repeats after the first pass. The
// extension precedes the first image, so only its descriptor is read.
fn gif_loop_count(bytes: &[u8]) -> u32 {
    let mut options = gif::DecodeOptions::new();
    options.set_color_output(gif::ColorOutput::Indexed);
    let Ok(mut decoder) = options.read_info(Cursor::new(bytes)) else {
        return 1;
    };
    let _ = decoder.next_frame_info();
    match decoder.repeat() {
        gif::Repeat::Infinite => 0,
        gif::Repeat::Finite(0) => 1,
        gif::Repeat::Finite(n) => u32::from(n) + 1,
    }
}

fn webp_loop_count(bytes: &[u8]) -> u32 {
    match image_webp::WebPDecoder::new(Cursor::new(bytes)) {
        Ok(decoder) => match decoder.loop_count() {
            image_webp::LoopCount::Forever => 0,
            image_webp::LoopCount::Times(n) => u32::from(n.get()),
        },
        Err(_) => 0,
    }
}

fn apng_loop_count(bytes: &[u8]) -> u32 {
    png::Decoder::new(Cursor::new(bytes))
        .read_info()
        .ok()
        .and_then(|reader| reader.info().animation_control)
        .map_or(0, |control| control.num_plays)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::codecs::gif::{GifEncoder, Repeat};
    use image::{Delay, Rgba};

    fn gif_bytes(delays_ms: &[u32], repeat: Option<Repeat>) -> Vec<u8> {
        let mut bytes = Vec::new();
        {
            let mut encoder = GifEncoder::new(&mut bytes);
            if let Some(repeat) = repeat {
                encoder.set_repeat(repeat).unwrap();
            }
            let frames = delays_ms.iter().enumerate().map(|(i, ms)| {
                let shade = (i as u8).wrapping_mul(80);
                let buffer = RgbaImage::from_pixel(4, 3, Rgba([shade, 0, 255 - shade, 255]));
                Frame::from_parts(buffer, 0, 0, Delay::from_numer_denom_ms(*ms, 1))
            });
            encoder.encode_frames(frames).unwrap();
        }
        bytes
    }

    #[test]
    fn gif_without_loop_extension_plays_once() {
        let decoded = AnimatedImage::from_bytes(&gif_bytes(&[100, 200], None)).unwrap();
        assert_eq!(decoded.loop_count(), 1);
        assert!(decoded.is_animated());
    }

    #[test]
    fn gif_infinite_loop_maps_to_zero() {
        let decoded =
            AnimatedImage::from_bytes(&gif_bytes(&[100, 200], Some(Repeat::Infinite))).unwrap();
        assert_eq!(decoded.loop_count(), 0);
    }

    #[test]
    fn gif_finite_repeat_counts_first_pass() {
        let decoded =
            AnimatedImage::from_bytes(&gif_bytes(&[100, 200], Some(Repeat::Finite(2)))).unwrap();
        assert_eq!(decoded.loop_count(), 3);
    }

    #[test]
    fn frames_carry_index_and_duration() {
        let decoded = AnimatedImage::from_bytes(&gif_bytes(&[100, 150, 200], None)).unwrap();
        let durations: Vec<u32> = decoded.frames().iter().map(|f| f.duration_ms).collect();
        let indices: Vec<usize> = decoded.frames().iter().map(|f| f.index).collect();
        assert_eq!(durations, vec![100, 150, 200]);
        assert_eq!(indices, vec![0, 1, 2]);
        assert_eq!(decoded.canvas_size(), (4, 3));
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(AnimatedImage::from_bytes(b"definitely not an image").is_err());
    }
}
