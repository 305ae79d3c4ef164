//! Commandline argument parser for the echolocus binary, using clap.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Acoustic source localisation with a circular microphone array
#[derive(Debug, Parser, Clone)]
#[clap(version, about)]
pub struct EchoArgs {
    #[command(subcommand, long_about)]
    /// Which task to perform
    pub command: CommandTask,

    /// RON file describing the array, surface, bands and fusion; defaults
    /// are used for anything it leaves out
    #[arg(short = 'c', long = "config", global = true)]
    pub config: Option<PathBuf>,
}

#[allow(missing_docs)]
#[derive(Debug, Subcommand, Clone)]
pub enum CommandTask {
    /// Locate sources in a multichannel recording, one heatmap per cycle
    #[command(about)]
    Heatmap(HeatmapCommand),

    /// Beamform a multichannel recording towards one direction
    #[command(about)]
    Steer(SteerCommand),

    /// Render a synthetic multichannel recording of one source
    #[command(about)]
    Simulate(SimulateCommand),
}

/// Arguments of `heatmap`
#[derive(Debug, Args, Clone)]
#[command(version, about)]
pub struct HeatmapCommand {
    /// Multichannel WAV file, one channel per microphone
    #[arg(short = 'i', long = "input")]
    pub input: PathBuf,

    /// Length of one localisation cycle, in seconds
    #[arg(short = 't', long = "cycle", default_value_t = 0.1)]
    pub cycle_seconds: f64,

    /// Where to write the last cycle's maps
    #[arg(short = 'o', long = "out")]
    pub outfile: PathBuf,

    /// Also write the last composite map as CSV
    #[arg(long = "csv")]
    pub csv: Option<PathBuf>,

    /// How many peaks to report per cycle
    #[arg(short = 'p', long = "peaks", default_value_t = 1)]
    pub peaks: usize,
}

/// Arguments of `steer`
#[derive(Debug, Args, Clone)]
#[command(version, about)]
pub struct SteerCommand {
    /// Multichannel WAV file, one channel per microphone
    #[arg(short = 'i', long = "input")]
    pub input: PathBuf,

    /// Mono WAV file for the steered trace
    #[arg(short = 'o', long = "out")]
    pub outfile: PathBuf,

    /// Azimuth to steer to, in degrees
    #[arg(
        long = "theta",
        conflicts_with_all = ["row", "col"],
        requires = "phi",
        allow_negative_numbers = true
    )]
    pub theta: Option<f64>,

    /// Elevation to steer to, in degrees
    #[arg(long = "phi", requires = "theta")]
    pub phi: Option<f64>,

    /// Grid row to steer to
    #[arg(long = "row", requires = "col")]
    pub row: Option<usize>,

    /// Grid column to steer to
    #[arg(long = "col", requires = "row")]
    pub col: Option<usize>,

    /// Weight each band by the cell's intensity in the recording's heatmap
    #[arg(long = "listen", requires = "row")]
    pub listen: bool,
}

/// Arguments of `simulate`
#[derive(Debug, Args, Clone)]
#[command(version, about)]
pub struct SimulateCommand {
    /// Multichannel WAV file to write
    #[arg(short = 'o', long = "out")]
    pub outfile: PathBuf,

    /// Source azimuth, in degrees
    #[arg(long = "theta", default_value_t = 0.0, allow_negative_numbers = true)]
    pub theta: f64,

    /// Source elevation, in degrees
    #[arg(long = "phi", default_value_t = 90.0)]
    pub phi: f64,

    /// Place a near source at x y z metres instead of a distant one
    #[arg(
        long = "point",
        num_args = 3,
        value_names = ["X", "Y", "Z"],
        allow_negative_numbers = true
    )]
    pub point: Option<Vec<f64>>,

    /// Tone frequencies in Hz, all at unit amplitude
    #[arg(short = 'f', long = "tones", num_args = 1.., default_values_t = [2000.0])]
    pub tones: Vec<f64>,

    /// Peak amplitude of the uniform noise added to every microphone
    #[arg(short = 'n', long = "noise", default_value_t = 0.0)]
    pub noise: f64,

    /// Length of the recording, in seconds
    #[arg(short = 'd', long = "duration", default_value_t = 1.0)]
    pub seconds: f64,

    /// Sample rate, in Hz
    #[arg(short = 's', long = "samp", default_value_t = 48000.0)]
    pub sample_rate: f64,

    /// Seed for the noise
    #[arg(long = "seed", default_value_t = 0)]
    pub seed: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_heatmap() {
        let args = EchoArgs::parse_from([
            "echolocus", "heatmap", "-i", "in.wav", "-o", "out.heat", "--csv", "out.csv", "-c",
            "rig.ron",
        ]);
        assert_eq!(args.config, Some(PathBuf::from("rig.ron")));
        match args.command {
            CommandTask::Heatmap(h) => {
                assert_eq!(h.cycle_seconds, 0.1);
                assert_eq!(h.csv, Some(PathBuf::from("out.csv")));
                assert_eq!(h.peaks, 1);
            }
            other => panic!("parsed {:?}", other),
        }
    }

    #[test]
    fn steer_needs_a_whole_direction() {
        assert!(EchoArgs::try_parse_from([
            "echolocus", "steer", "-i", "a.wav", "-o", "b.wav", "--theta", "10"
        ])
        .is_err());
        assert!(EchoArgs::try_parse_from([
            "echolocus", "steer", "-i", "a.wav", "-o", "b.wav", "--theta", "10", "--row", "1",
            "--col", "2", "--phi", "3"
        ])
        .is_err());
        assert!(EchoArgs::try_parse_from([
            "echolocus", "steer", "-i", "a.wav", "-o", "b.wav", "--row", "1", "--col", "2",
            "--listen"
        ])
        .is_ok());
    }

    #[test]
    fn simulate_point_takes_three_values() {
        let args = EchoArgs::parse_from([
            "echolocus", "simulate", "-o", "sim.wav", "--point", "0.5", "-0.5", "1", "-f", "1500",
            "2500",
        ]);
        match args.command {
            CommandTask::Simulate(s) => {
                assert_eq!(s.point, Some(vec![0.5, -0.5, 1.0]));
                assert_eq!(s.tones, vec![1500.0, 2500.0]);
                assert_eq!(s.sample_rate, 48000.0);
            }
            other => panic!("parsed {:?}", other),
        }
    }
}
