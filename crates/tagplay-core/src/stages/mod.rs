//! Default stage implementations and the standard stage set.
//!
//! - [`reader::FileReader`]: opens the track file
//! - [`decoder::SymphoniaDecoder`]: one instance per [`DecoderKind`]
//! - [`resampler::RateConverter`]: converts to the output rate
//! - [`writer::OutputWriter`]: plays through CPAL and reports how the run ended

pub mod decoder;
pub mod reader;
pub mod resampler;
pub mod writer;

use crate::chain::Chain;
use crate::config::OutputFormat;
use crate::decoder_kind::DecoderKind;
use crate::graph::{GraphError, StageGraph};

/// Inputs for building the standard stage set.
#[derive(Clone, Debug, Default)]
pub struct StageSetup {
    pub formats: OutputFormat,
    /// Output device name filter; `None` uses the host default.
    pub device: Option<String>,
}

/// Register reader, every decoder variant, converter and writer.
pub fn register_defaults<G: StageGraph + ?Sized>(
    graph: &mut G,
    setup: &StageSetup,
) -> Result<(), GraphError> {
    graph.register(Box::new(reader::FileReader::new(setup.formats.source)))?;
    for kind in DecoderKind::ALL {
        graph.register(Box::new(decoder::SymphoniaDecoder::new(
            kind,
            setup.formats.source,
        )))?;
    }
    graph.register(Box::new(resampler::RateConverter::new(setup.formats.output)))?;
    graph.register(Box::new(writer::OutputWriter::new(
        setup.formats.output,
        setup.device.clone(),
    )))?;
    Ok(())
}

/// Chain linked at startup.
pub fn default_chain() -> Chain {
    Chain::standard(DecoderKind::Mp3)
}
