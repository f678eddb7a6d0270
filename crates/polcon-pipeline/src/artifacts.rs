//! The four files a run leaves behind.

use crate::error::PipelineError;
use crate::run::PipelineOutput;
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

pub const GRAPH_FILE: &str = "graph.triples.jsonl";
pub const MACHINE_REPORT_FILE: &str = "report.machine.json";
pub const HUMAN_REPORT_FILE: &str = "report.human.txt";
pub const SUMMARY_FILE: &str = "summary.json";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactPaths {
    pub graph: PathBuf,
    pub machine_report: PathBuf,
    pub human_report: PathBuf,
    pub summary: PathBuf,
}

impl ArtifactPaths {
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            graph: dir.join(GRAPH_FILE),
            machine_report: dir.join(MACHINE_REPORT_FILE),
            human_report: dir.join(HUMAN_REPORT_FILE),
            summary: dir.join(SUMMARY_FILE),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Path> {
        [&self.graph, &self.machine_report, &self.human_report, &self.summary]
            .into_iter()
            .map(PathBuf::as_path)
    }
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> PipelineError + '_ {
    move |source| PipelineError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Write every artifact of `output` into `dir`, creating it if needed.
pub fn write_artifacts(output: &PipelineOutput, dir: &Path) -> Result<ArtifactPaths, PipelineError> {
    fs::create_dir_all(dir).map_err(io_err(dir))?;
    let paths = ArtifactPaths::in_dir(dir);

    let file = fs::File::create(&paths.graph).map_err(io_err(&paths.graph))?;
    let mut writer = BufWriter::new(file);
    output.graph.write_jsonl(&mut writer).map_err(io_err(&paths.graph))?;
    writer.flush().map_err(io_err(&paths.graph))?;

    let machine = output
        .report
        .to_json_pretty()
        .map_err(|source| PipelineError::Serialize {
            what: "machine report",
            source,
        })?;
    fs::write(&paths.machine_report, machine).map_err(io_err(&paths.machine_report))?;

    fs::write(&paths.human_report, &output.human_report).map_err(io_err(&paths.human_report))?;

    let summary = output.summary.to_json_pretty().map_err(|source| PipelineError::Serialize {
        what: "summary",
        source,
    })?;
    fs::write(&paths.summary, summary).map_err(io_err(&paths.summary))?;

    tracing::info!(dir = %dir.display(), triples = output.graph.len(), "wrote artifacts");
    Ok(paths)
}
