//! EchoLocus locates acoustic events, such as leaks or failing machinery,
//! with a circular microphone array. From one buffer of multichannel audio
//! it produces a spatial energy map over a target surface (a plane, a pipe,
//! a cylinder, or the far-field hemisphere) and can steer the array towards
//! any cell of that map to listen to it.
//!
//! The map comes from narrowband MUSIC run per frequency band and fused
//! across bands; see [engine::DoaEngine] for the configured cycle and
//! [config::LocatorConfig] for everything it can be told. Steering uses the
//! delay-multiply-and-sum beamformer in [dmas].
//!
//! Acquisition is left to the caller: anything implementing
//! [source::AudioSource] can feed the engine, and [simulator] provides a
//! synthetic source for trying things out without hardware.

#![warn(missing_docs)]
pub mod args;
pub mod audio;
pub mod butterworth;
pub mod component;
pub mod config;
pub mod dmas;
pub mod engine;
pub mod error;
pub mod filter_bank;
pub mod fusion;
pub mod geometry;
pub mod heatmap_file;
pub mod localizer;
pub mod manifold;
pub mod music;
pub mod simulator;
pub mod source;
pub mod spectral;
pub mod sphericalizer;
pub mod wav;

/// An iterator function that transposes the order of iteration based on
/// [this StackOverflow answer](https://stackoverflow.com/a/75477884/17443903).
/// Stops as soon as any inner iterator runs dry, so an empty outer iterator
/// never yields.
pub struct TransposeIter<I, T>
where
    I: IntoIterator<Item = T>,
{
    iterators: Vec<I::IntoIter>,
}

#[allow(missing_docs)]
pub trait TransposableIter<I, T>
where
    Self: Sized,
    Self: IntoIterator<Item = I>,
    I: IntoIterator<Item = T>,
{
    fn transpose(self) -> TransposeIter<I, T> {
        let iterators: Vec<_> = self.into_iter().map(|i| i.into_iter()).collect();
        TransposeIter { iterators }
    }
}

impl<I, T> Iterator for TransposeIter<I, T>
where
    I: IntoIterator<Item = T>,
{
    type Item = Vec<T>;
    fn next(&mut self) -> Option<Self::Item> {
        if self.iterators.is_empty() {
            return None;
        }
        self.iterators.iter_mut().map(|iter| iter.next()).collect()
    }
}

impl<I, T, Any> TransposableIter<I, T> for Any
where
    Any: IntoIterator<Item = I>,
    I: IntoIterator<Item = T>,
{
}
