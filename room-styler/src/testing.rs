//! Fakes for driving the pipeline without downloading any model.

use std::cell::Cell;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use image::{ColorType, DynamicImage, Rgb, RgbImage, Rgba, RgbaImage};
use sd_img2img::Img2ImgParams;
use tracing_subscriber::fmt::MakeWriter;

use crate::config::{CaptionConfig, SynthesisConfig};
use crate::models::{CaptionModel, ModelLoader, RunContext, StyleModel};

/// What the fake models were handed.
#[derive(Debug, Default)]
pub struct Seen {
    pub caption_input: Option<(ColorType, (u32, u32))>,
    pub style_input: Option<(ColorType, (u32, u32))>,
    pub prompt: Option<String>,
    pub params: Option<Img2ImgParams>,
}

pub struct FakeModels {
    pub captions: Vec<String>,
    pub fill: [u8; 3],
    pub synthesis_error: Option<String>,
    pub panic_in_caption: bool,
    pub captioner_loads: Cell<usize>,
    pub styler_loads: Cell<usize>,
    pub seen: Arc<Mutex<Seen>>,
}

impl Default for FakeModels {
    fn default() -> Self {
        Self {
            captions: vec!["a living room with a couch and a television".to_string()],
            fill: [200, 120, 40],
            synthesis_error: None,
            panic_in_caption: false,
            captioner_loads: Cell::new(0),
            styler_loads: Cell::new(0),
            seen: Arc::default(),
        }
    }
}

impl FakeModels {
    pub fn loads(&self) -> (usize, usize) {
        (self.captioner_loads.get(), self.styler_loads.get())
    }
}

struct FakeCaptioner {
    captions: Vec<String>,
    panic: bool,
    seen: Arc<Mutex<Seen>>,
}

impl CaptionModel for FakeCaptioner {
    fn captions(&mut self, image: &DynamicImage) -> anyhow::Result<Vec<String>> {
        if self.panic {
            panic!("captioner blew up");
        }
        self.seen.lock().unwrap().caption_input = Some((image.color(), dimensions(image)));
        Ok(self.captions.clone())
    }
}

struct FakeStyler {
    fill: [u8; 3],
    error: Option<String>,
    seen: Arc<Mutex<Seen>>,
}

impl StyleModel for FakeStyler {
    fn restyle(
        &mut self,
        prompt: &str,
        image: &DynamicImage,
        params: &Img2ImgParams,
    ) -> anyhow::Result<Vec<DynamicImage>> {
        {
            let mut seen = self.seen.lock().unwrap();
            seen.style_input = Some((image.color(), dimensions(image)));
            seen.prompt = Some(prompt.to_string());
            seen.params = Some(params.clone());
        }
        if let Some(error) = &self.error {
            anyhow::bail!("{error}");
        }
        let (width, height) = dimensions(image);
        Ok(vec![DynamicImage::ImageRgb8(RgbImage::from_pixel(
            width,
            height,
            Rgb(self.fill),
        ))])
    }
}

impl ModelLoader for FakeModels {
    fn load_captioner(
        &self,
        _config: &CaptionConfig,
        _context: &RunContext,
    ) -> anyhow::Result<Box<dyn CaptionModel>> {
        self.captioner_loads.set(self.captioner_loads.get() + 1);
        Ok(Box::new(FakeCaptioner {
            captions: self.captions.clone(),
            panic: self.panic_in_caption,
            seen: self.seen.clone(),
        }))
    }

    fn load_styler(
        &self,
        _config: &SynthesisConfig,
        _context: &RunContext,
    ) -> anyhow::Result<Box<dyn StyleModel>> {
        self.styler_loads.set(self.styler_loads.get() + 1);
        Ok(Box::new(FakeStyler {
            fill: self.fill,
            error: self.synthesis_error.clone(),
            seen: self.seen.clone(),
        }))
    }
}

fn dimensions(image: &DynamicImage) -> (u32, u32) {
    (image.width(), image.height())
}

/// In-memory diagnostics sink.
#[derive(Debug, Clone, Default)]
pub struct CapturedLog(Arc<Mutex<Vec<u8>>>);

impl CapturedLog {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl io::Write for CapturedLog {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for CapturedLog {
    type Writer = CapturedLog;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

/// Writes a small RGBA photo stand-in and returns its path.
pub fn write_room_image(dir: &Path, name: &str) -> PathBuf {
    let path = dir.join(name);
    RgbaImage::from_pixel(64, 48, Rgba([90, 140, 210, 255]))
        .save(&path)
        .unwrap();
    path
}
