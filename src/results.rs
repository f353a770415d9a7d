use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;

use serde::Serialize;
use serde_json::ser::PrettyFormatter;

use crate::error::{PipelineError, StageResult};
use crate::perf::RawSample;

/// `{node: value}` as written to the results document. Values keep the text
/// captured from the log.
pub fn results_document(samples: &[RawSample]) -> BTreeMap<String, String> {
    samples
        .iter()
        .map(|sample| (sample.node.clone(), sample.value.clone()))
        .collect()
}

/// Writes `samples` as a JSON object indented by four spaces.
pub fn export_results(path: &Path, samples: &[RawSample]) -> StageResult<()> {
    write_json(path, &results_document(samples))
}

pub fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> StageResult<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent).map_err(|err| {
            PipelineError::io(format!("creating directory {}", parent.display()), err)
        })?;
    }
    let file = File::create(path)
        .map_err(|err| PipelineError::io(format!("creating {}", path.display()), err))?;
    let mut writer = BufWriter::new(file);
    let mut serializer =
        serde_json::Serializer::with_formatter(&mut writer, PrettyFormatter::with_indent(b"    "));
    value.serialize(&mut serializer)?;
    writer
        .flush()
        .map_err(|err| PipelineError::io(format!("writing {}", path.display()), err))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_uses_four_space_indent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("stream_test_results.json");
        let samples = vec![
            RawSample {
                node: "node1".into(),
                value: "12000.5".into(),
            },
            RawSample {
                node: "node2".into(),
                value: "11950.0".into(),
            },
        ];
        export_results(&path, &samples).unwrap();
        let written = fs::read_to_string(&path).unwrap();
        assert_eq!(
            written,
            "{\n    \"node1\": \"12000.5\",\n    \"node2\": \"11950.0\"\n}"
        );
    }
}
