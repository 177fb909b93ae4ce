use image::imageops::{self, FilterType};
use image::{io::Reader as ImageReader, DynamicImage, Rgb, RgbImage};
use ndarray::Array4;
use std::path::Path;
use thiserror::Error;

use crate::config::{ModelConfig, ResizeMode, TensorLayout};

#[derive(Debug, Error)]
pub enum PreprocessError {
    #[error("Could not read image: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid image file: {0}")]
    Decode(#[from] image::ImageError),
}

/// Turns an image on disk into the classifier's input tensor.
#[derive(Debug, Clone)]
pub struct Preprocessor {
    size: u32,
    layout: TensorLayout,
    resize: ResizeMode,
    filter: FilterType,
}

impl Preprocessor {
    pub fn new(size: u32, layout: TensorLayout, resize: ResizeMode, filter: FilterType) -> Self {
        Self {
            size,
            layout,
            resize,
            filter,
        }
    }

    pub fn from_config(config: &ModelConfig) -> Self {
        Self::new(
            config.input_size,
            config.layout,
            config.resize,
            config.filter.into(),
        )
    }

    /// Shape of the tensor produced by [`Preprocessor::tensor`].
    pub fn input_shape(&self) -> [usize; 4] {
        self.layout.shape(self.size)
    }

    /// Decode the file, sniffing the format from its content.
    pub fn load<P: AsRef<Path>>(&self, path: P) -> Result<Array4<f32>, PreprocessError> {
        let img = ImageReader::open(path)?.with_guessed_format()?.decode()?;
        Ok(self.tensor(&img))
    }

    /// Resize to the input resolution and scale intensities to `[0, 1]`.
    pub fn tensor(&self, img: &DynamicImage) -> Array4<f32> {
        let img = self.resize(img);
        let s = self.size as usize;
        let pixel = |y: usize, x: usize, c: usize| {
            img.get_pixel(x as u32, y as u32)[c] as f32 / 255.0
        };

        match self.layout {
            TensorLayout::Nhwc => {
                Array4::from_shape_fn((1, s, s, 3), |(_, y, x, c)| pixel(y, x, c))
            }
            TensorLayout::Nchw => {
                Array4::from_shape_fn((1, 3, s, s), |(_, c, y, x)| pixel(y, x, c))
            }
        }
    }

    fn resize(&self, img: &DynamicImage) -> RgbImage {
        let rgb = img.to_rgb8();
        match self.resize {
            ResizeMode::Stretch => imageops::resize(&rgb, self.size, self.size, self.filter),
            ResizeMode::Letterbox => self.letterbox(&rgb),
        }
    }

    /// Fit the longer side to the input size, centre on a black canvas.
    fn letterbox(&self, rgb: &RgbImage) -> RgbImage {
        let size = self.size;
        let (width, height) = rgb.dimensions();
        let (new_width, new_height) = if width > height {
            (size, scaled_side(size, height, width))
        } else {
            (scaled_side(size, width, height), size)
        };

        let resized = imageops::resize(rgb, new_width, new_height, self.filter);
        let mut canvas = RgbImage::from_pixel(size, size, Rgb([0, 0, 0]));
        let pad_x = (size - new_width) / 2;
        let pad_y = (size - new_height) / 2;

        for (x, y, pixel) in resized.enumerate_pixels() {
            canvas.put_pixel(x + pad_x, y + pad_y, *pixel);
        }
        canvas
    }
}

/// Length of `side` once `longest` is scaled down to `size`, at least 1.
fn scaled_side(size: u32, side: u32, longest: u32) -> u32 {
    // widened so very large uploads cannot overflow the product
    ((u64::from(size) * u64::from(side)) / u64::from(longest)).max(1) as u32
}
