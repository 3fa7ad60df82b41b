use crate::error::FillError;
use crate::fill::{TemplateKind, fill_template};
use crate::font::SystemFonts;
use crate::placement::{PlacementDescriptor, RecordData};
use rayon::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};

/// One record to fill: identity for output naming plus field data.
#[derive(Debug, Clone)]
pub struct BatchRecord {
    pub id: i64,
    pub label: String,
    pub data: RecordData,
}

impl BatchRecord {
    pub fn new(id: i64, label: impl Into<String>, data: RecordData) -> Self {
        Self {
            id,
            label: label.into(),
            data,
        }
    }
}

/// Per-record outcome. `output` is the archive entry name when the fill
/// succeeded; `error` explains the failure when it did not.
#[derive(Debug, Clone)]
pub struct FillResult {
    pub record_id: i64,
    pub label: String,
    pub output: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug)]
pub struct BatchOutcome {
    pub archive_path: PathBuf,
    pub results: Vec<FillResult>,
}

impl BatchOutcome {
    pub fn succeeded(&self) -> usize {
        self.results.iter().filter(|r| r.output.is_some()).count()
    }
}

/// Drives the fill engine over a record set and packages the results.
pub struct BatchExporter {
    export_dir: PathBuf,
}

/// Per-run scratch directory, removed when the run ends, success or not.
struct ScratchDir(PathBuf);

impl Drop for ScratchDir {
    fn drop(&mut self) {
        if let Err(err) = fs::remove_dir_all(&self.0) {
            if err.kind() != std::io::ErrorKind::NotFound {
                log::warn!("failed to remove scratch dir {}: {err}", self.0.display());
            }
        }
    }
}

impl BatchExporter {
    pub fn new(export_dir: impl Into<PathBuf>) -> Self {
        Self {
            export_dir: export_dir.into(),
        }
    }

    /// Fill `template_path` once per record and pack every successful
    /// output into a zip archive under the export directory.
    ///
    /// One bad record never blocks the others: each record's failure is
    /// recorded in its [`FillResult`] and the batch continues. The
    /// archive is produced even when nothing succeeded (it then carries
    /// only a README note), so callers never have to distinguish "no
    /// archive" from "empty archive".
    pub fn run(
        &self,
        template_path: &Path,
        placements: &[PlacementDescriptor],
        records: &[BatchRecord],
        task_name: &str,
    ) -> Result<BatchOutcome, FillError> {
        if !template_path.is_file() {
            return Err(FillError::MissingTemplate(template_path.to_path_buf()));
        }
        if records.is_empty() {
            return Err(FillError::EmptyRecordSet);
        }
        let kind = TemplateKind::from_path(template_path)?;
        if kind == TemplateKind::Pdf && placements.is_empty() {
            return Err(FillError::MissingPlacements);
        }
        let template = fs::read(template_path)?;
        let extension = template_path
            .extension()
            .and_then(|v| v.to_str())
            .map(|v| format!(".{}", v.to_ascii_lowercase()))
            .unwrap_or_default();

        let task = {
            let cleaned = sanitize_component(task_name);
            if cleaned.is_empty() {
                "export".to_string()
            } else {
                cleaned
            }
        };
        let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
        let run_name = format!("{task}_{stamp}");

        fs::create_dir_all(&self.export_dir)?;
        let scratch = self.export_dir.join(&run_name);
        fs::create_dir_all(&scratch)?;
        let _scratch = ScratchDir(scratch.clone());

        log::info!(
            "batch fill: {} record(s) against {}",
            records.len(),
            template_path.display()
        );

        let fonts = SystemFonts::global();
        let results: Vec<FillResult> = records
            .par_iter()
            .map(|record| fill_one(record, &template, kind, placements, &extension, &scratch, fonts))
            .collect();

        // Single-writer packing step, after every worker has finished.
        let archive_path = self.export_dir.join(format!("{run_name}.zip"));
        let archive = fs::File::create(&archive_path)?;
        let mut zip = zip::ZipWriter::new(archive);
        let options = zip::write::FileOptions::default()
            .compression_method(zip::CompressionMethod::Deflated);

        let mut packed = 0usize;
        for result in &results {
            let Some(name) = result.output.as_deref() else {
                continue;
            };
            zip.start_file(name, options)?;
            let mut file = fs::File::open(scratch.join(name))?;
            std::io::copy(&mut file, &mut zip)?;
            packed += 1;
        }
        if packed == 0 {
            zip.start_file("README.txt", options)?;
            let mut note = String::from("No records were filled successfully in this run.\n");
            for result in &results {
                if let Some(error) = result.error.as_deref() {
                    note.push_str(&format!("record {} ({}): {}\n", result.record_id, result.label, error));
                }
            }
            std::io::Write::write_all(&mut zip, note.as_bytes())?;
        }
        zip.finish()?;

        log::info!(
            "batch fill finished: {packed}/{} packed into {}",
            results.len(),
            archive_path.display()
        );
        Ok(BatchOutcome {
            archive_path,
            results,
        })
    }
}

fn fill_one(
    record: &BatchRecord,
    template: &[u8],
    kind: TemplateKind,
    placements: &[PlacementDescriptor],
    extension: &str,
    scratch: &Path,
    fonts: &SystemFonts,
) -> FillResult {
    let mut result = FillResult {
        record_id: record.id,
        label: record.label.clone(),
        output: None,
        error: None,
    };

    let label = sanitize_component(&record.label);
    if label.is_empty() {
        result.error = Some("record has no usable label for output naming".to_string());
        log::warn!("record {} skipped: empty label", record.id);
        return result;
    }

    match fill_template(template, kind, &record.data, placements, fonts) {
        Ok(bytes) => {
            let name = format!("{label}_{}{extension}", record.id);
            match fs::write(scratch.join(&name), &bytes) {
                Ok(()) => {
                    log::debug!("record {} filled: {name}", record.id);
                    result.output = Some(name);
                }
                Err(err) => {
                    log::warn!("record {} output write failed: {err}", record.id);
                    result.error = Some(format!("failed to write output: {err}"));
                }
            }
        }
        Err(err) => {
            log::warn!("record {} ({}) failed: {err}", record.id, record.label);
            result.error = Some(err.to_string());
        }
    }
    result
}

/// Make a label or task name safe as a filename component: whitespace
/// becomes `_`, path separators and other hostile characters are dropped.
fn sanitize_component(value: &str) -> String {
    value
        .trim()
        .chars()
        .filter_map(|c| {
            if c.is_whitespace() {
                Some('_')
            } else if c.is_control() || matches!(c, '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|') {
                None
            } else {
                Some(c)
            }
        })
        .collect::<String>()
        .trim_matches('.')
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    fn text_template(dir: &Path) -> PathBuf {
        let path = dir.join("letter.txt");
        fs::write(&path, "Hello {{name}} from {{department}}").expect("write template");
        path
    }

    fn record(id: i64, label: &str, name: &str) -> BatchRecord {
        let mut data = RecordData::new();
        data.set("name", name);
        data.set("department", "Math");
        BatchRecord::new(id, label, data)
    }

    fn archive_entries(path: &Path) -> Vec<(String, String)> {
        let file = fs::File::open(path).expect("open archive");
        let mut archive = zip::ZipArchive::new(file).expect("read archive");
        let mut entries = Vec::new();
        for i in 0..archive.len() {
            let mut entry = archive.by_index(i).expect("entry");
            let mut content = String::new();
            entry.read_to_string(&mut content).expect("read entry");
            entries.push((entry.name().to_string(), content));
        }
        entries.sort();
        entries
    }

    #[test]
    fn batch_isolates_the_failing_record() {
        let dir = tempfile::tempdir().expect("tempdir");
        let template = text_template(dir.path());
        let exporter = BatchExporter::new(dir.path().join("exports"));

        let records = vec![
            record(1, "Alice", "Alice"),
            record(2, "", "Nameless"),
            record(3, "Chen Wei", "Chen"),
        ];
        let outcome = exporter
            .run(&template, &[], &records, "spring export")
            .expect("run");

        assert_eq!(outcome.results.len(), 3);
        assert_eq!(outcome.succeeded(), 2);
        assert!(outcome.results[0].error.is_none());
        assert!(outcome.results[1].error.is_some());
        assert!(outcome.results[2].error.is_none());

        let entries = archive_entries(&outcome.archive_path);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].0, "Alice_1.txt");
        assert_eq!(entries[0].1, "Hello Alice from Math");
        assert_eq!(entries[1].0, "Chen_Wei_3.txt");
        assert!(
            outcome
                .archive_path
                .file_name()
                .and_then(|v| v.to_str())
                .map(|v| v.starts_with("spring_export_"))
                .unwrap_or(false)
        );
    }

    #[test]
    fn empty_record_set_fails_fast_with_no_leftovers() {
        let dir = tempfile::tempdir().expect("tempdir");
        let template = text_template(dir.path());
        let export_dir = dir.path().join("exports");
        let exporter = BatchExporter::new(&export_dir);

        let err = exporter
            .run(&template, &[], &[], "task")
            .expect_err("must fail");
        assert!(matches!(err, FillError::EmptyRecordSet));
        let leftovers = fs::read_dir(&export_dir)
            .map(|entries| entries.count())
            .unwrap_or(0);
        assert_eq!(leftovers, 0, "no archive and no scratch state");
    }

    #[test]
    fn missing_template_fails_fast() {
        let dir = tempfile::tempdir().expect("tempdir");
        let exporter = BatchExporter::new(dir.path());
        let err = exporter
            .run(
                &dir.path().join("absent.pdf"),
                &[],
                &[record(1, "Alice", "Alice")],
                "task",
            )
            .expect_err("must fail");
        assert!(matches!(err, FillError::MissingTemplate(_)));
    }

    #[test]
    fn pdf_batch_without_placements_fails_fast() {
        let dir = tempfile::tempdir().expect("tempdir");
        let template = dir.path().join("form.pdf");
        fs::write(&template, crate::overlay::tests::make_pdf(&["FORM"])).expect("write");
        let exporter = BatchExporter::new(dir.path().join("exports"));
        let err = exporter
            .run(&template, &[], &[record(1, "Alice", "Alice")], "task")
            .expect_err("must fail");
        assert!(matches!(err, FillError::MissingPlacements));
    }

    #[test]
    fn zero_successes_still_produce_an_archive_with_a_note() {
        let dir = tempfile::tempdir().expect("tempdir");
        let template = text_template(dir.path());
        let exporter = BatchExporter::new(dir.path().join("exports"));

        let outcome = exporter
            .run(&template, &[], &[record(9, "", "Nameless")], "task")
            .expect("run");
        assert_eq!(outcome.succeeded(), 0);
        let entries = archive_entries(&outcome.archive_path);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].0, "README.txt");
        assert!(entries[0].1.contains("record 9"));
    }

    #[test]
    fn scratch_dir_is_removed_after_the_run() {
        let dir = tempfile::tempdir().expect("tempdir");
        let template = text_template(dir.path());
        let export_dir = dir.path().join("exports");
        let exporter = BatchExporter::new(&export_dir);

        let outcome = exporter
            .run(&template, &[], &[record(1, "Alice", "Alice")], "task")
            .expect("run");
        let remaining: Vec<_> = fs::read_dir(&export_dir)
            .expect("read export dir")
            .flatten()
            .map(|e| e.path())
            .collect();
        assert_eq!(remaining, vec![outcome.archive_path.clone()]);
    }

    #[test]
    fn pdf_batch_produces_loadable_documents() {
        let dir = tempfile::tempdir().expect("tempdir");
        let template = dir.path().join("form.pdf");
        fs::write(&template, crate::overlay::tests::make_pdf(&["FORM"])).expect("write");
        let exporter = BatchExporter::new(dir.path().join("exports"));

        let placements = vec![PlacementDescriptor::text("name", 0, 100.0, 700.0)];
        let outcome = exporter
            .run(&template, &placements, &[record(1, "Alice", "Alice")], "pdf run")
            .expect("run");
        assert_eq!(outcome.succeeded(), 1);

        let file = fs::File::open(&outcome.archive_path).expect("open archive");
        let mut archive = zip::ZipArchive::new(file).expect("read archive");
        let mut entry = archive.by_index(0).expect("entry");
        assert_eq!(entry.name(), "Alice_1.pdf");
        let mut bytes = Vec::new();
        entry.read_to_end(&mut bytes).expect("read entry");
        let doc = lopdf::Document::load_mem(&bytes).expect("filled pdf parses");
        assert_eq!(doc.get_pages().len(), 1);
    }

    #[test]
    fn sanitize_component_strips_hostile_characters() {
        assert_eq!(sanitize_component("Chen Wei"), "Chen_Wei");
        assert_eq!(sanitize_component("../../etc"), "etc");
        assert_eq!(sanitize_component("a/b\\c:d"), "abcd");
        assert_eq!(sanitize_component("  "), "");
        assert_eq!(sanitize_component("张三"), "张三");
    }
}
