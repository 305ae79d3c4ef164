//! Defines the Component trait, used by each stage of the locator pipeline.
//! This enforces a common interface between stages, so that each stage can
//! consume data from the preceding one, process it, and pass new data on to
//! the next, each on its own thread.

use crate::audio::AudioBuffer;
use crate::engine::{DoaEngine, HeatmapFrame};
use crate::error::DoaError;
use crate::wav::float_spec;
use hound::{Error as HoundError, WavWriter};
use log::{info, warn};
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;
use std::sync::mpsc::{Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Returned by [Component::finalize].
#[derive(Debug)]
pub enum ComponentError {
    /// The WAV writer could not be finalised
    HoundError(HoundError),
    /// The processing stage failed while shutting down
    DoaError(DoaError),
}

///
/// A stage in the locator pipeline: heatmap estimation, steering, or writing
/// results out. All structs that perform a processing step must implement
/// Component, so that they can be integrated into the pipeline.
///
pub trait Component: ToString {
    /// What the stage consumes
    type InData;
    /// What the stage produces
    type OutData;

    /// Converts an input of type A into an output of type B
    fn convert(&mut self, input: Self::InData) -> Self::OutData;

    /// Cleans up at termination of pipeline
    fn finalize(&mut self) -> Result<(), ComponentError>;
}

/// Runs the given Component on its own thread. On receiving data of type
/// InData on the input channel, the Component converts them to data of type
/// OutData and sends it to the output channel.
pub fn run_component<C: Component + std::marker::Send + 'static>(
    mut component: Box<C>,
    input: Receiver<<C as Component>::InData>,
    output: Sender<<C as Component>::OutData>,
) -> JoinHandle<()>
where
    <C as Component>::InData: Send + 'static,
    <C as Component>::OutData: Send + 'static,
{
    thread::spawn(move || {
        while let Ok(data) = input.recv() {
            let out_data = component.convert(data);
            if let Err(error) = output.send(out_data) {
                warn!("{} : received error {}.", component.to_string(), error);
            }
        }

        if let Err(component_error) = component.finalize() {
            warn!(
                "{} : error during terminating : {component_error:?}.",
                component.to_string(),
            );
        }
        info!("{} : terminated.", component.to_string());
    })
}

/// Turns each cycle buffer into a [HeatmapFrame].
pub struct HeatmapStage {
    engine: Arc<DoaEngine>,
    cycles: usize,
}

impl HeatmapStage {
    /// Wraps `engine`; cycles are counted for the exit log.
    pub fn new(engine: Arc<DoaEngine>) -> Self {
        Self { engine, cycles: 0 }
    }
}

impl Component for HeatmapStage {
    type InData = AudioBuffer;
    type OutData = Result<HeatmapFrame, DoaError>;

    fn convert(&mut self, input: AudioBuffer) -> Self::OutData {
        self.cycles += 1;
        self.engine.heatmap(&input)
    }

    fn finalize(&mut self) -> Result<(), ComponentError> {
        info!("{} : processed {} cycles.", self.to_string(), self.cycles);
        Ok(())
    }
}

impl ToString for HeatmapStage {
    fn to_string(&self) -> String {
        "HeatmapStage".to_string()
    }
}

/// Steers every cycle buffer towards one fixed direction.
pub struct SteerStage {
    engine: Arc<DoaEngine>,
    theta: f64,
    phi: f64,
}

impl SteerStage {
    /// Steers towards (`theta`, `phi`), in radians.
    pub fn new(engine: Arc<DoaEngine>, theta: f64, phi: f64) -> Self {
        Self { engine, theta, phi }
    }
}

impl Component for SteerStage {
    type InData = AudioBuffer;
    type OutData = Result<Vec<f64>, DoaError>;

    fn convert(&mut self, input: AudioBuffer) -> Self::OutData {
        self.engine.steer(&input, self.theta, self.phi)
    }

    fn finalize(&mut self) -> Result<(), ComponentError> {
        Ok(())
    }
}

impl ToString for SteerStage {
    fn to_string(&self) -> String {
        "SteerStage".to_string()
    }
}

/// Appends steered traces to a mono float WAV file.
pub struct TraceWriter {
    writer: Option<WavWriter<BufWriter<File>>>,
}

impl TraceWriter {
    /// Creates the output file at `path`.
    pub fn new(path: impl AsRef<Path>, sample_rate: f64) -> Result<Self, HoundError> {
        let writer = WavWriter::create(path, float_spec(1, sample_rate.round() as u32))?;
        Ok(Self {
            writer: Some(writer),
        })
    }
}

impl Component for TraceWriter {
    type InData = Vec<f64>;
    type OutData = Result<(), HoundError>;

    /// Appends a trace, then flushes so the header stays valid between cycles
    fn convert(&mut self, input: Vec<f64>) -> Result<(), HoundError> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| HoundError::IoError(std::io::ErrorKind::BrokenPipe.into()))?;
        for s in input {
            writer.write_sample(s as f32)?;
        }
        writer.flush()
    }

    /// Dropping the WavWriter would finalize it too, but this way the error
    /// is reported.
    fn finalize(&mut self) -> Result<(), ComponentError> {
        match self.writer.take() {
            Some(writer) => writer.finalize().map_err(ComponentError::HoundError),
            None => Ok(()),
        }
    }
}

impl ToString for TraceWriter {
    fn to_string(&self) -> String {
        "TraceWriter".to_string()
    }
}
