use std::io::{self, Write};
use std::path::Path;
use std::process::ExitCode;

use serde::Serialize;

use crate::error::StylerError;

/// The single record written to stdout at the end of a run.
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum Report {
    Success {
        caption: String,
        prompt: String,
        output_path: String,
    },
    Failure {
        error: StylerError,
    },
}

impl Report {
    pub fn success(caption: String, prompt: String, output_path: &Path) -> Self {
        Self::Success {
            caption,
            prompt,
            output_path: output_path.display().to_string(),
        }
    }

    pub fn failure(error: impl Into<StylerError>) -> Self {
        Self::Failure {
            error: error.into(),
        }
    }

    pub fn exit_code(&self) -> ExitCode {
        match self {
            Self::Success { .. } => ExitCode::SUCCESS,
            Self::Failure { .. } => ExitCode::FAILURE,
        }
    }

    /// Writes the record as one line of JSON and flushes.
    pub fn emit<W: Write>(&self, out: &mut W) -> io::Result<()> {
        let line = serde_json::to_string(self)?;
        writeln!(out, "{line}")?;
        out.flush()
    }
}
