//! Admission rules for batch submissions.
//!
//! Every rule is a plain function returning the first violation it finds.
//! Nothing here allocates state or touches the scheduler, so a rejected batch leaves no trace.

use std::collections::HashSet;

use thiserror::Error;
use vidra_model::{
    BatchFile, BatchRequest, BatchResult, FileStatus, Priority, ProbeOptions, SourceType,
};

pub const MAX_FILES: usize = 1000;
pub const MAX_ID_LEN: usize = 256;
pub const MAX_PATH_LEN: usize = 2000;
pub const MAX_METADATA_KEY_LEN: usize = 128;
pub const MAX_METADATA_VALUE_LEN: usize = 1024;
pub const MAX_CUSTOM_ARGS: usize = 100;
pub const MAX_ERROR_LEN: usize = 2000;
pub const MAX_CONCURRENCY: usize = 50;
pub const MAX_TIMEOUT_MS: u64 = 24 * 60 * 60 * 1000;

const ID_FORBIDDEN: &[char] = &[';', '&', '|', '`', '$', '(', ')', '<', '>', '\\', '/'];
const SHELL_META: &[char] = &[';', '&', '|', '`', '$', '(', ')', '<', '>'];
const ARG_FORBIDDEN: &[char] = &[';', '&', '|', '`', '$', '<', '>'];

/// First rule a submission broke.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{field}: {message}")]
pub struct ValidationError {
    /// Dotted path of the offending field, e.g. `files[3].id`.
    pub field: String,
    /// Index of the offending file or result, when there is one.
    pub index: Option<usize>,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            index: None,
            message: message.into(),
        }
    }

    fn at(index: usize, field: &str, message: impl Into<String>) -> Self {
        Self {
            field: format!("files[{index}].{field}"),
            index: Some(index),
            message: message.into(),
        }
    }
}

type Result<T = ()> = std::result::Result<T, ValidationError>;

/// Check a whole submission.
pub fn validate_request(req: &BatchRequest) -> Result {
    validate_file_count(req.files.len())?;

    let mut seen = HashSet::with_capacity(req.files.len());
    for (i, file) in req.files.iter().enumerate() {
        validate_file(i, file)?;
        if !seen.insert(file.id.as_str()) {
            return Err(ValidationError::at(i, "id", format!("duplicate file id '{}'", file.id)));
        }
    }

    if let Some(opts) = &req.options {
        validate_options("options", opts)?;
    }
    validate_timeout(req.timeout_ms)?;
    validate_concurrency(req.concurrency)
}

pub fn validate_file_count(n: usize) -> Result {
    if n == 0 {
        return Err(ValidationError::new("files", "batch must contain at least one file"));
    }
    if n > MAX_FILES {
        return Err(ValidationError::new(
            "files",
            format!("batch has {n} files; at most {MAX_FILES} allowed"),
        ));
    }
    Ok(())
}

pub fn validate_file(index: usize, file: &BatchFile) -> Result {
    validate_file_id(&file.id).map_err(|m| ValidationError::at(index, "id", m))?;
    validate_path(&file.path).map_err(|m| ValidationError::at(index, "path", m))?;

    if let Some(opts) = &file.options {
        validate_options(&format!("files[{index}].options"), opts).map_err(|mut e| {
            e.index = Some(index);
            e
        })?;
    }

    for (key, value) in &file.metadata {
        validate_metadata_entry(key, value)
            .map_err(|m| ValidationError::at(index, &format!("metadata.{key}"), m))?;
    }
    Ok(())
}

pub fn validate_file_id(id: &str) -> std::result::Result<(), String> {
    if id.is_empty() {
        return Err("must not be empty".into());
    }
    let len = id.chars().count();
    if len > MAX_ID_LEN {
        return Err(format!("{len} chars; at most {MAX_ID_LEN} allowed"));
    }
    if let Some(c) = id.chars().find(|c| ID_FORBIDDEN.contains(c) || c.is_control()) {
        return Err(format!("contains forbidden character {c:?}"));
    }
    Ok(())
}

pub fn validate_path(path: &str) -> std::result::Result<(), String> {
    if path.is_empty() {
        return Err("must not be empty".into());
    }
    let len = path.chars().count();
    if len > MAX_PATH_LEN {
        return Err(format!("{len} chars; at most {MAX_PATH_LEN} allowed"));
    }
    if path.contains("..") {
        return Err("must not contain '..'".into());
    }
    if path.starts_with('-') {
        return Err("must not start with '-'".into());
    }
    if let Some(c) = path.chars().find(|c| SHELL_META.contains(c) || c.is_control()) {
        return Err(format!("contains forbidden character {c:?}"));
    }
    Ok(())
}

pub fn validate_metadata_entry(key: &str, value: &str) -> std::result::Result<(), String> {
    if key.is_empty() {
        return Err("key must not be empty".into());
    }
    if key.chars().count() > MAX_METADATA_KEY_LEN {
        return Err(format!("key longer than {MAX_METADATA_KEY_LEN} chars"));
    }
    if !key
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err("key may only contain letters, digits, '-' and '_'".into());
    }
    if value.chars().count() > MAX_METADATA_VALUE_LEN {
        return Err(format!("value longer than {MAX_METADATA_VALUE_LEN} chars"));
    }
    if value
        .chars()
        .any(|c| c.is_control() && !matches!(c, '\t' | '\n' | '\r'))
    {
        return Err("value contains control characters".into());
    }
    Ok(())
}

/// Custom arguments must not be able to escape the probe's process boundary.
pub fn validate_options(field: &str, opts: &ProbeOptions) -> Result {
    if opts.custom_args.len() > MAX_CUSTOM_ARGS {
        return Err(ValidationError::new(
            format!("{field}.customArgs"),
            format!("{} arguments; at most {MAX_CUSTOM_ARGS} allowed", opts.custom_args.len()),
        ));
    }
    for (i, arg) in opts.custom_args.iter().enumerate() {
        let arg_field = format!("{field}.customArgs[{i}]");
        if arg.trim().is_empty() {
            return Err(ValidationError::new(arg_field, "must not be empty"));
        }
        if let Some(c) = arg.chars().find(|c| ARG_FORBIDDEN.contains(c) || c.is_control()) {
            return Err(ValidationError::new(
                arg_field,
                format!("contains forbidden character {c:?}"),
            ));
        }
    }
    if let Some(t) = opts.timeout_ms
        && t > MAX_TIMEOUT_MS
    {
        return Err(ValidationError::new(
            format!("{field}.timeoutMs"),
            format!("{t}ms exceeds 24h"),
        ));
    }
    Ok(())
}

pub fn validate_timeout(timeout_ms: Option<u64>) -> Result {
    match timeout_ms {
        Some(0) => Err(ValidationError::new("timeoutMs", "must be positive")),
        Some(t) if t > MAX_TIMEOUT_MS => Err(ValidationError::new(
            "timeoutMs",
            format!("{t}ms exceeds 24h"),
        )),
        _ => Ok(()),
    }
}

pub fn validate_concurrency(concurrency: Option<usize>) -> Result {
    match concurrency {
        Some(c) if c == 0 || c > MAX_CONCURRENCY => Err(ValidationError::new(
            "concurrency",
            format!("{c} is outside 1..={MAX_CONCURRENCY}"),
        )),
        _ => Ok(()),
    }
}

/// Parse a priority coming from an untyped surface.
pub fn parse_priority(s: &str) -> Result<Priority> {
    s.parse()
        .map_err(|_| ValidationError::new("priority", format!("'{s}' is not one of low|normal|high|urgent")))
}

/// Parse a source type coming from an untyped surface.
pub fn parse_source_type(index: usize, s: &str) -> Result<SourceType> {
    s.parse().map_err(|_| {
        ValidationError::at(
            index,
            "sourceType",
            format!("'{s}' is not one of local|url|s3|gcs|azure|upload|stream"),
        )
    })
}

/// Parse a result status coming from persisted state.
pub fn parse_file_status(index: usize, s: &str) -> Result<FileStatus> {
    s.parse().map_err(|_| ValidationError {
        field: format!("results[{index}].status"),
        index: Some(index),
        message: format!("'{s}' is not a known status"),
    })
}

/// Re-check a result table, e.g. after loading it back from storage.
pub fn validate_results(results: &[BatchResult]) -> Result {
    for (i, r) in results.iter().enumerate() {
        let err = |field: &str, message: String| ValidationError {
            field: format!("results[{i}].{field}"),
            index: Some(i),
            message,
        };

        if r.file_id.is_empty() {
            return Err(err("fileId", "must not be empty".into()));
        }
        match (&r.error, r.status) {
            (Some(e), FileStatus::Failed) if e.chars().count() > MAX_ERROR_LEN => {
                return Err(err("error", format!("longer than {MAX_ERROR_LEN} chars")));
            }
            (Some(_), status) if status != FileStatus::Failed => {
                return Err(err("error", format!("set on a {status} result")));
            }
            _ => {}
        }
        if let (Some(started), Some(completed)) = (r.started_at, r.completed_at)
            && completed < started
        {
            return Err(err("completedAt", "earlier than startedAt".into()));
        }
    }
    Ok(())
}

/// The result ids of a finished batch must be exactly the request's file ids.
pub fn validate_result_set(files: &[BatchFile], results: &[BatchResult]) -> Result {
    if files.len() != results.len() {
        return Err(ValidationError::new(
            "results",
            format!("{} results for {} files", results.len(), files.len()),
        ));
    }
    let expected: HashSet<&str> = files.iter().map(|f| f.id.as_str()).collect();
    let mut seen = HashSet::with_capacity(results.len());
    for (i, r) in results.iter().enumerate() {
        if !expected.contains(r.file_id.as_str()) || !seen.insert(r.file_id.as_str()) {
            return Err(ValidationError {
                field: format!("results[{i}].fileId"),
                index: Some(i),
                message: format!("'{}' is unknown or duplicated", r.file_id),
            });
        }
    }
    Ok(())
}

/// Clip an error message to what result validation accepts.
pub fn truncate_error(message: &str) -> String {
    match message.char_indices().nth(MAX_ERROR_LEN) {
        Some((cut, _)) => message[..cut].to_string(),
        None => message.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, SystemTime};

    use super::*;

    fn file(id: &str) -> BatchFile {
        BatchFile::new(id, format!("/media/{id}.mp4"), SourceType::Local)
    }

    fn request(n: usize) -> BatchRequest {
        BatchRequest::new((0..n).map(|i| file(&format!("f{i}"))).collect())
    }

    #[test]
    fn accepts_a_well_formed_batch() {
        let req = request(3)
            .with_options(ProbeOptions::new().with_arg("-hide_banner"))
            .with_concurrency(2)
            .with_timeout_ms(60_000);
        assert_eq!(validate_request(&req), Ok(()));
    }

    #[test]
    fn file_count_bounds() {
        assert!(validate_request(&request(0)).is_err());
        assert!(validate_request(&request(1)).is_ok());
        assert!(validate_request(&request(MAX_FILES)).is_ok());

        let err = validate_request(&request(MAX_FILES + 1)).unwrap_err();
        assert_eq!(err.field, "files");
    }

    #[test]
    fn id_with_slash_is_rejected_with_index() {
        let mut req = request(3);
        req.files[2].id = "clips/a".into();

        let err = validate_request(&req).unwrap_err();
        assert_eq!(err.index, Some(2));
        assert_eq!(err.field, "files[2].id");
        assert!(err.to_string().contains("files[2].id"));
        assert!(err.message.contains("'/'"));
    }

    #[test]
    fn id_rules() {
        assert!(validate_file_id("cam-01_front.mp4").is_ok());
        assert!(validate_file_id("").is_err());
        assert!(validate_file_id(&"x".repeat(MAX_ID_LEN)).is_ok());
        assert!(validate_file_id(&"x".repeat(MAX_ID_LEN + 1)).is_err());
        for bad in ["a;b", "a&b", "a|b", "a`b", "a$b", "a(b", "a)b", "a<b", "a>b", "a\\b"] {
            assert!(validate_file_id(bad).is_err(), "{bad} should be rejected");
        }
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let mut req = request(2);
        req.files[1].id = "f0".into();

        let err = validate_request(&req).unwrap_err();
        assert_eq!(err.index, Some(1));
        assert!(err.message.contains("duplicate"));
    }

    #[test]
    fn path_rules() {
        assert!(validate_path("/media/a.mp4").is_ok());
        assert!(validate_path("https://cdn.example.com/v/a.mkv?sig=abc").is_ok());
        assert!(validate_path("").is_err());
        assert!(validate_path("/media/../etc/passwd").is_err());
        assert!(validate_path("/media/a.mp4; rm -rf /").is_err());
        assert!(validate_path("/media/$(whoami).mp4").is_err());
        assert!(validate_path("-version").is_err());
        assert!(validate_path("-i").is_err());
        assert!(validate_path("/media/-clip.mp4").is_ok());
        assert!(validate_path(&format!("/{}", "a".repeat(MAX_PATH_LEN))).is_err());
    }

    #[test]
    fn metadata_rules() {
        assert!(validate_metadata_entry("camera_id", "front\tleft\n").is_ok());
        assert!(validate_metadata_entry("", "x").is_err());
        assert!(validate_metadata_entry("bad key", "x").is_err());
        assert!(validate_metadata_entry(&"k".repeat(MAX_METADATA_KEY_LEN + 1), "x").is_err());
        assert!(validate_metadata_entry("k", &"v".repeat(MAX_METADATA_VALUE_LEN + 1)).is_err());
        assert!(validate_metadata_entry("k", "bell\u{7}").is_err());

        let mut req = request(2);
        req.files[1] = file("f1").with_metadata("bad key", "x");
        let err = validate_request(&req).unwrap_err();
        assert_eq!(err.index, Some(1));
        assert!(err.field.starts_with("files[1].metadata"));
    }

    #[test]
    fn custom_args_cannot_alter_the_process_boundary() {
        let ok = ProbeOptions::new().with_arg("-select_streams").with_arg("v:0");
        assert!(validate_options("options", &ok).is_ok());

        for bad in [">", "out.json>", "|", "&&", "a;b", "$(id)", "`id`", "  "] {
            let opts = ProbeOptions::new().with_arg(bad);
            assert!(validate_options("options", &opts).is_err(), "{bad:?} should be rejected");
        }

        let mut many = ProbeOptions::new();
        many.custom_args = vec!["-v".into(); MAX_CUSTOM_ARGS + 1];
        let err = validate_options("options", &many).unwrap_err();
        assert_eq!(err.field, "options.customArgs");
    }

    #[test]
    fn per_file_option_errors_carry_the_index() {
        let mut req = request(3);
        req.files[1] = file("f1").with_options(ProbeOptions::new().with_arg("|"));

        let err = validate_request(&req).unwrap_err();
        assert_eq!(err.index, Some(1));
        assert_eq!(err.field, "files[1].options.customArgs[0]");
    }

    #[test]
    fn timeout_and_concurrency_bounds() {
        assert!(validate_timeout(None).is_ok());
        assert!(validate_timeout(Some(MAX_TIMEOUT_MS)).is_ok());
        assert!(validate_timeout(Some(MAX_TIMEOUT_MS + 1)).is_err());
        assert!(validate_timeout(Some(0)).is_err());

        assert!(validate_concurrency(None).is_ok());
        assert!(validate_concurrency(Some(1)).is_ok());
        assert!(validate_concurrency(Some(MAX_CONCURRENCY)).is_ok());
        assert!(validate_concurrency(Some(MAX_CONCURRENCY + 1)).is_err());
        assert!(validate_concurrency(Some(0)).is_err());
    }

    #[test]
    fn untyped_enum_values() {
        assert_eq!(parse_priority("urgent"), Ok(Priority::Urgent));
        assert_eq!(parse_priority("asap").unwrap_err().field, "priority");
        assert_eq!(parse_source_type(4, "gcs"), Ok(SourceType::Gcs));
        assert_eq!(parse_source_type(4, "ftp").unwrap_err().field, "files[4].sourceType");
        assert_eq!(parse_file_status(0, "skipped"), Ok(FileStatus::Skipped));
        assert!(parse_file_status(0, "done").is_err());
    }

    #[test]
    fn result_rules() {
        let now = SystemTime::now();
        let ok = BatchResult {
            status: FileStatus::Failed,
            error: Some("probe exited 1".into()),
            started_at: Some(now),
            completed_at: Some(now + Duration::from_millis(5)),
            processing_time_ms: 5,
            ..BatchResult::pending("a")
        };
        assert!(validate_results(std::slice::from_ref(&ok)).is_ok());

        let long = BatchResult {
            error: Some("e".repeat(MAX_ERROR_LEN + 1)),
            ..ok.clone()
        };
        assert_eq!(validate_results(&[long]).unwrap_err().field, "results[0].error");

        let stray = BatchResult {
            status: FileStatus::Completed,
            ..ok.clone()
        };
        assert!(validate_results(&[stray]).is_err());

        let backwards = BatchResult {
            completed_at: Some(now - Duration::from_secs(1)),
            ..ok
        };
        assert_eq!(
            validate_results(&[backwards]).unwrap_err().field,
            "results[0].completedAt"
        );
    }

    #[test]
    fn result_set_must_match_files() {
        let files: Vec<BatchFile> = ["a", "b"].into_iter().map(file).collect();
        let good = vec![BatchResult::pending("b"), BatchResult::pending("a")];
        assert!(validate_result_set(&files, &good).is_ok());

        let dup = vec![BatchResult::pending("a"), BatchResult::pending("a")];
        assert!(validate_result_set(&files, &dup).is_err());

        let short = vec![BatchResult::pending("a")];
        assert!(validate_result_set(&files, &short).is_err());
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        let msg = "é".repeat(MAX_ERROR_LEN + 10);
        let cut = truncate_error(&msg);
        assert_eq!(cut.chars().count(), MAX_ERROR_LEN);
        assert_eq!(truncate_error("short"), "short");
    }
}
