//! This module provides an API to read and write [HeatmapFile]s, the format
//! the locator saves its maps in. The files have the following structure:
//!
//! - First there is a header that contains some metadata:
//!   - The shape of every map, rows by columns
//!   - The fusion policy the composite was made with
//!   - The centre frequency of each band
//!   - An array of tags, one per stored map; see [LayerTag].
//! - Then there is a separator, which is a byte of all 1s; `0xFF`.
//! - Finally, the maps, as big-endian `f32`s, one whole map after another,
//!   each in row-major order.
//!
//! The header is encoded using [serde] and [ron]. In the file, it appears as
//! follows:
//!
//! ```text
//! (rows:A,cols:B,policy:"linadd",band_centers:[C,...],layers:[Composite,Band(0),...])
//! ```

use crate::engine::HeatmapFrame;
use crate::fusion::FusionPolicy;
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::{
    borrow::Cow,
    fmt,
    fs::File,
    io::{Read, Write},
    path::Path,
};

/// Maps stored in a [HeatmapFile], with the header describing them.
#[derive(Debug, Clone, PartialEq)]
pub struct HeatmapFile {
    header: HeatmapFileHeader,
    samples: Vec<f32>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
struct HeatmapFileHeader {
    rows: u64,
    cols: u64,
    policy: FusionPolicy,
    band_centers: Vec<f64>,
    layers: Vec<LayerTag>,
}

/// What a stored map is.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
pub enum LayerTag {
    /// The fused, normalised map
    Composite,
    /// One band's normalised map, indexing `band_centers`
    Band(usize),
}

/// Returned when reading, building, or writing a [HeatmapFile] fails.
#[derive(Debug)]
pub enum HeatmapFileError {
    /// A layer's shape differs from the first layer's.
    UnequalLayerShapes,

    /// A band tag points past the band list.
    UnknownBand(usize),

    /// No layer carries the requested tag.
    MissingLayer(LayerTag),

    /// No delimiter between the header and the sample binary.
    NoDelimiter,

    /// The sample binary does not hold exactly the maps the header lists.
    SampleCount {
        /// Samples the header calls for
        expected: usize,
        /// Samples actually read
        got: usize,
    },

    /// Returned when io fails when reading or writing files.
    IoError(std::io::Error),

    /// Returned when serialization of the header fails.
    RonError(ron::Error),

    /// Returned when deserialization of the header fails.
    RonSpannedError(ron::de::SpannedError),
}

impl fmt::Display for HeatmapFileError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use HeatmapFileError as HFE;
        let msg = match self {
            HFE::UnequalLayerShapes => Cow::from("layers have different shapes"),
            HFE::UnknownBand(band) => Cow::from(format!("layer tagged with unknown band {}", band)),
            HFE::MissingLayer(tag) => Cow::from(format!("no {:?} layer in heatmap file", tag)),
            HFE::NoDelimiter => Cow::from("no delimiter in heatmap file"),
            HFE::SampleCount { expected, got } => Cow::from(format!(
                "header describes {} samples, file holds {}",
                expected, got
            )),
            HFE::IoError(error) => Cow::from(format!("io error: {}", error)),
            HFE::RonError(error) => Cow::from(format!("ron error: {}", error)),
            HFE::RonSpannedError(error) => Cow::from(format!("ron spanning error: {}", error)),
        };

        write!(f, "{}", msg)
    }
}

impl std::error::Error for HeatmapFileError {}

impl HeatmapFile {
    /// Make a [HeatmapFileBuilder], which can be used to set the policy and
    /// bands and add layers, before building the [HeatmapFile].
    pub fn builder() -> HeatmapFileBuilder {
        HeatmapFileBuilder::new()
    }

    /// The composite and every band map of `frame`.
    pub fn from_frame(frame: &HeatmapFrame, policy: FusionPolicy) -> Result<Self, HeatmapFileError> {
        frame
            .band_maps
            .iter()
            .enumerate()
            .fold(
                Self::builder()
                    .set_policy(policy)
                    .set_band_centers(&frame.band_centers)
                    .add_layer(&frame.composite, LayerTag::Composite),
                |builder, (i, map)| builder.add_layer(map, LayerTag::Band(i)),
            )
            .build()
    }

    /// (rows, cols) of every layer.
    pub fn shape(&self) -> (usize, usize) {
        (self.header.rows as usize, self.header.cols as usize)
    }

    /// Fusion policy the composite was made with.
    pub fn policy(&self) -> FusionPolicy {
        self.header.policy
    }

    /// Centre frequency of each band layer, Hz.
    pub fn band_centers(&self) -> &[f64] {
        &self.header.band_centers
    }

    /// Tags of the stored layers, in file order.
    pub fn layers(&self) -> &[LayerTag] {
        &self.header.layers
    }

    /// The map stored under `tag`, if any.
    pub fn layer(&self, tag: LayerTag) -> Option<Array2<f64>> {
        let index = self.header.layers.iter().position(|t| *t == tag)?;
        let (rows, cols) = self.shape();
        let len = rows * cols;
        let values = self.samples[index * len..(index + 1) * len]
            .iter()
            .map(|&v| v as f64)
            .collect();
        Array2::from_shape_vec((rows, cols), values).ok()
    }

    /// Write out a [HeatmapFile] to the path provided.
    pub fn to_path(&self, path: impl AsRef<Path>) -> Result<(), HeatmapFileError> {
        let mut handle = File::create(path).map_err(HeatmapFileError::IoError)?;
        self.to_file(&mut handle)
    }

    /// Write out a [HeatmapFile] to the [Write]able object provided.
    pub fn to_file(&self, file: &mut impl Write) -> Result<(), HeatmapFileError> {
        let h_str = ron::ser::to_string(&self.header).map_err(HeatmapFileError::RonError)?;

        file.write_all(h_str.as_bytes())
            .map_err(HeatmapFileError::IoError)?;
        file.write_all(&[0xFF]).map_err(HeatmapFileError::IoError)?;

        let s_buf: Vec<u8> = self.samples.iter().flat_map(|f| f.to_be_bytes()).collect();
        file.write_all(&s_buf).map_err(HeatmapFileError::IoError)
    }

    /// Read a [HeatmapFile] from the path provided.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, HeatmapFileError> {
        let mut handle = File::open(path).map_err(HeatmapFileError::IoError)?;
        Self::from_file(&mut handle)
    }

    /// Read a [HeatmapFile] from the [Read]able object provided.
    pub fn from_file(file: &mut impl Read) -> Result<Self, HeatmapFileError> {
        let mut raw = Vec::new();
        file.read_to_end(&mut raw)
            .map_err(HeatmapFileError::IoError)?;

        let delim_idx = raw
            .iter()
            .position(|e| *e == 0xFF)
            .ok_or(HeatmapFileError::NoDelimiter)?;
        let (header_buf, samples_buf) = raw.split_at(delim_idx);
        let samples_buf = &samples_buf[1..];

        let header = ron::de::from_bytes::<HeatmapFileHeader>(header_buf)
            .map_err(HeatmapFileError::RonSpannedError)?;
        if let Some(band) = unknown_band(&header.layers, header.band_centers.len()) {
            return Err(HeatmapFileError::UnknownBand(band));
        }

        let expected = (header.rows * header.cols) as usize * header.layers.len();
        let chunks = samples_buf.chunks_exact(4);
        if !chunks.remainder().is_empty() || samples_buf.len() / 4 != expected {
            return Err(HeatmapFileError::SampleCount {
                expected,
                got: samples_buf.len() / 4,
            });
        }
        let samples = chunks
            .map(|bs| f32::from_be_bytes([bs[0], bs[1], bs[2], bs[3]]))
            .collect();

        Ok(HeatmapFile { header, samples })
    }

    /// Writes the layer under `tag` as CSV, one grid row per line.
    pub fn write_csv(&self, tag: LayerTag, out: &mut impl Write) -> Result<(), HeatmapFileError> {
        let map = self
            .layer(tag)
            .ok_or(HeatmapFileError::MissingLayer(tag))?;
        for row in map.rows() {
            let line: Vec<String> = row.iter().map(|v| v.to_string()).collect();
            writeln!(out, "{}", line.join(",")).map_err(HeatmapFileError::IoError)?;
        }
        Ok(())
    }
}

fn unknown_band(layers: &[LayerTag], n_bands: usize) -> Option<usize> {
    layers.iter().find_map(|t| match t {
        LayerTag::Band(b) if *b >= n_bands => Some(*b),
        _ => None,
    })
}

/// Collects layers for a [HeatmapFile].
#[derive(Debug, Clone, Default)]
pub struct HeatmapFileBuilder {
    policy: FusionPolicy,
    band_centers: Vec<f64>,
    layers: Vec<(LayerTag, Array2<f64>)>,
}

impl HeatmapFileBuilder {
    fn new() -> Self {
        Self::default()
    }

    /// Records the fusion policy.
    pub fn set_policy(self, policy: FusionPolicy) -> Self {
        HeatmapFileBuilder { policy, ..self }
    }

    /// Records the band centre frequencies.
    pub fn set_band_centers(self, band_centers: &[f64]) -> Self {
        HeatmapFileBuilder {
            band_centers: band_centers.to_vec(),
            ..self
        }
    }

    /// Adds a tagged map to the builder.
    pub fn add_layer(mut self, map: &Array2<f64>, tag: LayerTag) -> Self {
        self.layers.push((tag, map.clone()));
        self
    }

    /// Builds the [HeatmapFile], failing if layers differ in shape or a band
    /// tag has no centre frequency.
    pub fn build(self) -> Result<HeatmapFile, HeatmapFileError> {
        let (rows, cols) = self.layers.first().map(|(_, m)| m.dim()).unwrap_or((0, 0));
        if self.layers.iter().any(|(_, m)| m.dim() != (rows, cols)) {
            return Err(HeatmapFileError::UnequalLayerShapes);
        }
        let tags: Vec<LayerTag> = self.layers.iter().map(|(t, _)| *t).collect();
        if let Some(band) = unknown_band(&tags, self.band_centers.len()) {
            return Err(HeatmapFileError::UnknownBand(band));
        }

        let samples = self
            .layers
            .iter()
            .flat_map(|(_, m)| m.iter().map(|&v| v as f32))
            .collect();

        Ok(HeatmapFile {
            header: HeatmapFileHeader {
                rows: rows as u64,
                cols: cols as u64,
                policy: self.policy,
                band_centers: self.band_centers,
                layers: tags,
            },
            samples,
        })
    }
}
