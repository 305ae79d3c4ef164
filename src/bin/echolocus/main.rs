//! Command-line front end: locate sources in a recording, steer a recording
//! towards a direction, or render a synthetic recording to try both on.

use clap::Parser;
use echolocus::{
    args::{CommandTask, EchoArgs, HeatmapCommand, SimulateCommand, SteerCommand},
    component::{run_component, HeatmapStage, SteerStage, TraceWriter},
    config::LocatorConfig,
    engine::DoaEngine,
    error::DoaError,
    heatmap_file::{HeatmapFile, LayerTag},
    localizer::localize_peaks,
    simulator::{PointSource, SourceLocation},
    source::{AudioSource, WavSource},
    sphericalizer::cell_direction,
    wav::{read_wav, write_wav},
};
use log::{error, info, warn};
use std::{
    error::Error,
    fs::File,
    io::BufWriter,
    path::Path,
    process,
    sync::mpsc::{channel, Receiver, Sender},
    sync::Arc,
    thread::JoinHandle,
};

// Example:
// cargo run --bin echolocus -- simulate -o sim.wav --theta 120 --phi 60 -f 1500 2500 -n 0.01
// cargo run --bin echolocus -- heatmap -i sim.wav -o sim.heat --csv sim.csv
// cargo run --bin echolocus -- steer -i sim.wav -o steered.wav --theta 120 --phi 60

fn main() {
    env_logger::init();
    let args = EchoArgs::parse();

    let config = match load_config(args.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!("could not load configuration: {}", e);
            process::exit(2);
        }
    };

    let result = match args.command {
        CommandTask::Heatmap(cmd) => heatmap(config, cmd),
        CommandTask::Steer(cmd) => steer(config, cmd),
        CommandTask::Simulate(cmd) => simulate(config, cmd),
    };

    if let Err(e) = result {
        error!("{}", e);
        process::exit(1);
    }
}

fn load_config(path: Option<&Path>) -> Result<LocatorConfig, DoaError> {
    let config = match path {
        Some(path) => {
            info!("reading configuration from {}", path.display());
            LocatorConfig::from_path(path)?
        }
        None => LocatorConfig::default(),
    };
    config.validate()?;
    Ok(config)
}

fn heatmap(config: LocatorConfig, cmd: HeatmapCommand) -> Result<(), Box<dyn Error>> {
    let source = WavSource::from_path(&cmd.input, cmd.cycle_seconds)?;
    let policy = config.fusion;
    let engine = Arc::new(DoaEngine::new(config, source.sample_rate())?);
    let grid = Arc::clone(engine.grid());
    info!(
        "locating over {} cycles of {}",
        source.cycles(),
        cmd.input.display()
    );

    let (audio_tx, audio_rx) = channel();
    let (frame_tx, frame_rx) = channel();
    let stage = run_component(Box::new(HeatmapStage::new(engine)), audio_rx, frame_tx);

    for cycle in source {
        audio_tx.send(cycle)?;
    }
    drop(audio_tx);

    let mut last = None;
    for (i, frame) in frame_rx.iter().enumerate() {
        match frame {
            Ok(frame) => {
                for peak in localize_peaks(&frame.composite, &grid, cmd.peaks, 2) {
                    match peak.position {
                        Some([x, y, z]) => info!(
                            "cycle {}: peak {:.3} at ({:.2}, {:.2}, {:.2}) m",
                            i, peak.value, x, y, z
                        ),
                        None => info!(
                            "cycle {}: peak {:.3} at theta {:.1}°, phi {:.1}°",
                            i, peak.value, peak.theta_deg, peak.phi_deg
                        ),
                    }
                }
                last = Some(frame);
            }
            Err(e) => warn!("cycle {} dropped: {}", i, e),
        }
    }
    if stage.join().is_err() {
        warn!("heatmap stage panicked");
    }

    let frame = last.ok_or("no cycle produced a heatmap")?;
    let file = HeatmapFile::from_frame(&frame, policy)?;
    file.to_path(&cmd.outfile)?;
    info!("wrote {}", cmd.outfile.display());

    if let Some(csv) = cmd.csv {
        let mut out = BufWriter::new(File::create(&csv)?);
        file.write_csv(LayerTag::Composite, &mut out)?;
        info!("wrote {}", csv.display());
    }
    Ok(())
}

fn steer(config: LocatorConfig, cmd: SteerCommand) -> Result<(), Box<dyn Error>> {
    let audio = read_wav(&cmd.input)?;
    let sample_rate = audio.sample_rate();
    let engine = Arc::new(DoaEngine::new(config, sample_rate)?);

    let (trace_tx, trace_rx) = channel::<Vec<f64>>();
    let (done_tx, done_rx) = channel();
    let writer = run_component(
        Box::new(TraceWriter::new(&cmd.outfile, sample_rate)?),
        trace_rx,
        done_tx,
    );

    let (theta, phi) = match (cmd.theta, cmd.phi, cmd.row, cmd.col) {
        (Some(theta), Some(phi), _, _) => (theta.to_radians(), phi.to_radians()),
        (_, _, Some(row), Some(col)) if cmd.listen => {
            let frame = engine.heatmap(&audio)?;
            trace_tx.send(engine.listen(&audio, &frame, row, col)?)?;
            return finish_trace(trace_tx, done_rx, writer, &cmd);
        }
        (_, _, Some(row), Some(col)) => {
            let dir = cell_direction(engine.grid(), row, col)?;
            (dir.theta, dir.phi)
        }
        _ => return Err("give either --theta and --phi, or --row and --col".into()),
    };
    info!(
        "steering towards theta {:.1}°, phi {:.1}°",
        theta.to_degrees(),
        phi.to_degrees()
    );

    let (audio_tx, audio_rx) = channel();
    let (steered_tx, steered_rx) = channel();
    let stage = run_component(
        Box::new(SteerStage::new(engine, theta, phi)),
        audio_rx,
        steered_tx,
    );
    audio_tx.send(audio)?;
    drop(audio_tx);
    for steered in steered_rx.iter() {
        trace_tx.send(steered?)?;
    }
    if stage.join().is_err() {
        warn!("steer stage panicked");
    }
    finish_trace(trace_tx, done_rx, writer, &cmd)
}

fn finish_trace(
    trace_tx: Sender<Vec<f64>>,
    done_rx: Receiver<Result<(), hound::Error>>,
    writer: JoinHandle<()>,
    cmd: &SteerCommand,
) -> Result<(), Box<dyn Error>> {
    drop(trace_tx);
    for written in done_rx.iter() {
        written?;
    }
    if writer.join().is_err() {
        warn!("trace writer panicked");
    }
    info!("wrote {}", cmd.outfile.display());
    Ok(())
}

fn simulate(config: LocatorConfig, cmd: SimulateCommand) -> Result<(), Box<dyn Error>> {
    let location = match cmd.point.as_deref() {
        Some(&[x, y, z]) => SourceLocation::Point([x, y, z]),
        Some(_) => return Err("--point takes exactly three coordinates".into()),
        None => SourceLocation::Direction {
            theta: cmd.theta.to_radians(),
            phi: cmd.phi.to_radians(),
        },
    };
    let tones = cmd.tones.iter().map(|&f| (f, 1.0)).collect();
    let source = PointSource::new(location, tones)
        .with_noise(cmd.noise, cmd.seed)
        .with_attenuation(matches!(location, SourceLocation::Point(_)));

    let n_samples = (cmd.seconds * cmd.sample_rate).round() as usize;
    let audio = source.render(&config.array, cmd.sample_rate, n_samples)?;
    write_wav(&cmd.outfile, &audio)?;
    info!(
        "wrote {} channels of {:.2} s to {}",
        audio.n_channels(),
        audio.duration(),
        cmd.outfile.display()
    );
    Ok(())
}
