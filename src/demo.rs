use std::io::Write;
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use burn::prelude::*;
use rand::Rng;

use crate::app::AppContext;
use crate::data::{class_name, PixelRow};
use crate::error::DemoError;
use crate::inference::Prediction;
use crate::render::{save_as_png, to_ascii};

/// One finished evaluate cycle.
#[derive(Debug, Clone)]
pub struct Evaluation {
    /// Index of the sample in the dataset.
    pub index: usize,
    /// True label of the sample.
    pub label: u8,
    pub prediction: Prediction,
    /// Raw, unnormalized pixels of the sample.
    pub pixels: PixelRow,
}

impl Evaluation {
    pub fn is_correct(&self) -> bool {
        self.prediction.class == self.label as usize
    }
}

/// Display surface the demo draws to.
pub trait DemoView {
    fn present(&mut self, evaluation: &Evaluation) -> Result<(), DemoError>;
}

/// Prints the prediction and a shaded rendering of the sample.
pub struct TerminalView<W> {
    out: W,
    color: bool,
}

impl<W: Write> TerminalView<W> {
    pub fn new(out: W, color: bool) -> Self {
        Self { out, color }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> DemoView for TerminalView<W> {
    fn present(&mut self, evaluation: &Evaluation) -> Result<(), DemoError> {
        let (marker, color) = if evaluation.is_correct() {
            ("correct", "\x1b[32m")
        } else {
            ("wrong", "\x1b[31m")
        };
        let name = evaluation.prediction.class_name();

        if self.color {
            writeln!(self.out, "{color}{name}\x1b[0m [{marker}]")?;
        } else {
            writeln!(self.out, "{name} [{marker}]")?;
        }
        writeln!(
            self.out,
            "sample #{} is a {}",
            evaluation.index,
            class_name(evaluation.label as usize)
        )?;
        write!(self.out, "{}", to_ascii(&evaluation.pixels))?;
        self.out.flush()?;

        Ok(())
    }
}

/// Writes every rendered sample as a PNG next to whatever `inner` shows.
pub struct PngView<V> {
    inner: V,
    dir: PathBuf,
    scale: u32,
    written: usize,
}

impl<V: DemoView> PngView<V> {
    pub fn new(inner: V, dir: impl Into<PathBuf>, scale: u32) -> Self {
        Self {
            inner,
            dir: dir.into(),
            scale,
            written: 0,
        }
    }
}

impl<V: DemoView> DemoView for PngView<V> {
    fn present(&mut self, evaluation: &Evaluation) -> Result<(), DemoError> {
        self.inner.present(evaluation)?;

        let path = self.dir.join(format!(
            "{:05}-sample{}-{}.png",
            self.written,
            evaluation.index,
            if evaluation.is_correct() { "correct" } else { "wrong" }
        ));
        save_as_png(&evaluation.pixels, self.scale, &path)?;
        self.written += 1;
        log::debug!("Saved {}", path.display());

        Ok(())
    }
}

/// Where the demo loop currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DemoState {
    /// Timer pending for the given delay.
    IdleWait(Duration),
    /// Classifying and drawing a sample.
    Evaluate,
}

/// Samples, classifies and draws random images until told to stop.
pub struct DemoLoop<'a, B: Backend, V, R> {
    context: &'a AppContext<B>,
    view: V,
    rng: R,
    state: DemoState,
}

impl<'a, B: Backend, V: DemoView, R: Rng> DemoLoop<'a, B, V, R> {
    pub fn new(context: &'a AppContext<B>, view: V, rng: R) -> Self {
        Self {
            context,
            view,
            rng,
            state: DemoState::Evaluate,
        }
    }

    pub fn state(&self) -> DemoState {
        self.state
    }

    pub fn view(&self) -> &V {
        &self.view
    }

    pub fn into_view(self) -> V {
        self.view
    }

    /// Classify one uniformly drawn sample.
    pub fn evaluate(&mut self) -> Result<Evaluation, DemoError> {
        let dataset = self.context.dataset();
        if dataset.is_empty() {
            return Err(DemoError::EmptyDataset);
        }

        let index = self.rng.random_range(0..dataset.len());
        let (pixels, label) = dataset.sample(index).ok_or(DemoError::EmptyDataset)?;
        let prediction = self.context.predictor().predict(pixels)?;

        Ok(Evaluation {
            index,
            label,
            prediction,
            pixels: *pixels,
        })
    }

    /// Run one Evaluate step and return the wait scheduled after it.
    pub fn tick(&mut self) -> Result<(Evaluation, Duration), DemoError> {
        self.state = DemoState::Evaluate;

        let evaluation = self.evaluate()?;
        log::info!(
            "Predicted {} for sample #{} ({})",
            evaluation.prediction.class_name(),
            evaluation.index,
            if evaluation.is_correct() { "correct" } else { "wrong" }
        );
        self.view.present(&evaluation)?;

        let delay = self.context.delay().schedule();
        self.state = DemoState::IdleWait(delay);

        Ok((evaluation, delay))
    }

    /// Loop forever, or for `cycles` evaluations when given.
    ///
    /// There is no retry: the first failing cycle ends the loop with its error.
    pub fn run(&mut self, cycles: Option<usize>) -> Result<usize, DemoError> {
        let mut completed = 0;

        loop {
            if cycles.is_some_and(|cycles| completed >= cycles) {
                return Ok(completed);
            }
            if completed > 0 {
                if let DemoState::IdleWait(delay) = self.state {
                    thread::sleep(delay);
                }
            }

            self.tick()?;
            completed += 1;
        }
    }
}
