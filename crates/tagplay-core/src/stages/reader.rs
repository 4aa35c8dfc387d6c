//! Source stage: opens the track file and hands its bytes to the decoder.

use std::fs::File;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::config::MediaFormat;
use crate::stage::{ByteStream, Flow, RunContext, Stage, StageDescriptor};

pub struct FileReader {
    desc: StageDescriptor,
    uri: Option<PathBuf>,
}

impl FileReader {
    pub fn new(format: MediaFormat) -> Self {
        Self {
            desc: StageDescriptor::reader(format),
            uri: None,
        }
    }

    pub fn uri(&self) -> Option<&Path> {
        self.uri.as_deref()
    }
}

impl Stage for FileReader {
    fn descriptor(&self) -> &StageDescriptor {
        &self.desc
    }

    fn set_uri(&mut self, uri: &Path) -> Result<()> {
        tracing::debug!(uri = %uri.display(), "reader source set");
        self.uri = Some(uri.to_path_buf());
        Ok(())
    }

    fn start(&mut self, _input: Flow, _ctx: &RunContext) -> Result<Flow> {
        let path = self.uri.as_ref().context("reader has no source")?;
        let file = File::open(path).with_context(|| format!("open {}", path.display()))?;
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());
        Ok(Flow::Bytes(ByteStream {
            source: Box::new(file),
            extension,
        }))
    }

    fn reset_state(&mut self) {
        self.uri = None;
    }
}
