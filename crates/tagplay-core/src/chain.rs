//! Active signal path and the linker that swaps its decoder.
//!
//! A [`Chain`] is a value: reader first, writer last, one decoder at
//! [`DECODER_SLOT`]. The [`ChainLinker`] replaces it wholesale when the decoder
//! changes and never touches the reader, converter or writer stages.

use crate::decoder_kind::DecoderKind;
use crate::graph::{GraphError, StageGraph};
use crate::stage::{CONVERTER, READER, WRITER};

/// Position of the decoder in every chain.
pub const DECODER_SLOT: usize = 1;

/// Smallest valid chain: reader, decoder, writer.
const MIN_LEN: usize = 3;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ChainError {
    #[error("chain needs at least reader, decoder and writer (got {0} stages)")]
    TooShort(usize),
    #[error("stage {0:?} appears twice in the chain")]
    Duplicate(String),
    #[error("empty stage name at position {0}")]
    EmptyName(usize),
}

/// Ordered stage names from source to sink.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Chain {
    stages: Vec<String>,
}

impl Chain {
    pub fn new<I, S>(names: I) -> Result<Self, ChainError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let stages: Vec<String> = names.into_iter().map(Into::into).collect();
        if stages.len() < MIN_LEN {
            return Err(ChainError::TooShort(stages.len()));
        }
        for (i, name) in stages.iter().enumerate() {
            if name.is_empty() {
                return Err(ChainError::EmptyName(i));
            }
            if stages[..i].contains(name) {
                return Err(ChainError::Duplicate(name.clone()));
            }
        }
        Ok(Self { stages })
    }

    /// Reader → `decoder` → converter → writer, using the well-known stage names.
    pub fn standard(decoder: DecoderKind) -> Self {
        Self {
            stages: vec![
                READER.to_string(),
                decoder.stage_name().to_string(),
                CONVERTER.to_string(),
                WRITER.to_string(),
            ],
        }
    }

    pub fn stages(&self) -> &[String] {
        &self.stages
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn reader(&self) -> &str {
        &self.stages[0]
    }

    pub fn decoder(&self) -> &str {
        &self.stages[DECODER_SLOT]
    }

    pub fn writer(&self) -> &str {
        &self.stages[self.stages.len() - 1]
    }

    pub fn contains(&self, name: &str) -> bool {
        self.stages.iter().any(|s| s == name)
    }

    /// Copy of this chain with `decoder` in the decoder slot.
    pub fn with_decoder(&self, decoder: &str) -> Chain {
        let mut stages = self.stages.clone();
        stages[DECODER_SLOT] = decoder.to_string();
        Chain { stages }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    #[error("relink to {wanted} failed: {source}")]
    Graph {
        wanted: String,
        #[source]
        source: GraphError,
    },
}

/// Result of a decoder selection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LinkOutcome {
    /// Requested decoder was already linked; nothing was called.
    Unchanged,
    /// The decoder slot changed.
    Swapped { from: String, to: String },
    /// Same decoder, but the chain had to be relinked after an earlier failure.
    Relinked,
}

/// Keeps the graph's linked chain in step with the requested decoder.
pub struct ChainLinker {
    chain: Chain,
    dirty: bool,
}

impl ChainLinker {
    pub fn new(initial: Chain) -> Self {
        Self {
            chain: initial,
            dirty: true,
        }
    }

    pub fn chain(&self) -> &Chain {
        &self.chain
    }

    /// Whether the graph may not match [`chain`](Self::chain).
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Link the initial chain once at startup.
    pub fn link_initial<G: StageGraph + ?Sized>(&mut self, graph: &mut G) -> Result<(), LinkError> {
        graph.relink(&self.chain).map_err(|source| LinkError::Graph {
            wanted: self.chain.decoder().to_string(),
            source,
        })?;
        self.dirty = false;
        tracing::info!(chain = ?self.chain.stages(), "chain linked");
        Ok(())
    }

    /// Put the decoder for `kind` into the decoder slot.
    ///
    /// No graph call is made when that decoder is already linked. Otherwise the old
    /// decoder is broken out of the chain and the new chain is relinked. A failure
    /// leaves the linker dirty so the next call relinks unconditionally.
    pub fn select<G: StageGraph + ?Sized>(
        &mut self,
        kind: DecoderKind,
        graph: &mut G,
    ) -> Result<LinkOutcome, LinkError> {
        let wanted = kind.stage_name();
        if !self.dirty && self.chain.decoder() == wanted {
            tracing::debug!(decoder = wanted, "decoder unchanged");
            return Ok(LinkOutcome::Unchanged);
        }

        let from = self.chain.decoder().to_string();
        let next = self.chain.with_decoder(wanted);
        self.dirty = true;

        let wrap = |source| LinkError::Graph {
            wanted: wanted.to_string(),
            source,
        };
        if from != wanted {
            graph.breakup(&from).map_err(wrap)?;
        }
        graph.relink(&next).map_err(wrap)?;

        self.chain = next;
        self.dirty = false;
        if from == wanted {
            tracing::info!(decoder = wanted, "chain relinked");
            Ok(LinkOutcome::Relinked)
        } else {
            tracing::info!(from = %from, to = wanted, "decoder swapped");
            Ok(LinkOutcome::Swapped {
                from,
                to: wanted.to_string(),
            })
        }
    }
}
