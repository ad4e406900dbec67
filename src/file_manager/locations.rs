// Reading JSON-lines records from local paths or remote URLs

use serde_json::Value;
use std::io::{BufRead, BufReader, Read};
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

const FETCH_TIMEOUT_SECS: u64 = 60;

/// Where a location string points to.
#[derive(Debug, Clone, PartialEq)]
pub enum Location {
    Local(PathBuf),
    Http(Url),
}

pub fn parse_location(location: &str) -> Result<Location, String> {
    match Url::parse(location) {
        Ok(url) if url.scheme() == "file" => url
            .to_file_path()
            .map(Location::Local)
            .map_err(|_| format!("Invalid file URL: {}", location)),
        Ok(url) if url.scheme() == "http" || url.scheme() == "https" => Ok(Location::Http(url)),
        Ok(url) => Err(format!("Unsupported location scheme '{}': {}", url.scheme(), location)),
        // Relative or absolute filesystem path
        Err(_) => Ok(Location::Local(PathBuf::from(location))),
    }
}

/// Join a child segment onto a location prefix.
pub fn join_location(prefix: &str, child: &str) -> String {
    format!("{}/{}", prefix.trim_end_matches('/'), child.trim_start_matches('/'))
}

fn read_lines<R: Read>(reader: R, source: &str) -> Result<Vec<Value>, String> {
    let mut records = Vec::new();
    for (index, line) in BufReader::new(reader).lines().enumerate() {
        let line = line.map_err(|e| format!("Failed to read {}: {}", source, e))?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let value = serde_json::from_str(trimmed)
            .map_err(|e| format!("{} line {}: {}", source, index + 1, e))?;
        records.push(value);
    }
    Ok(records)
}

/// Load every JSON-lines record stored at `location`.
pub fn read_json_lines(location: &str) -> Result<Vec<Value>, String> {
    match parse_location(location)? {
        Location::Local(path) => {
            let file = std::fs::File::open(&path)
                .map_err(|e| format!("Failed to open {:?}: {}", path, e))?;
            read_lines(file, location)
        }
        Location::Http(url) => {
            let response = ureq::AgentBuilder::new()
                .timeout(Duration::from_secs(FETCH_TIMEOUT_SECS))
                .build()
                .get(url.as_str())
                .call()
                .map_err(|e| format!("Failed to fetch {}: {}", url, e))?;
            read_lines(response.into_reader(), location)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_location_kinds() {
        assert_eq!(
            parse_location("/tmp/out.jsonl").unwrap(),
            Location::Local(PathBuf::from("/tmp/out.jsonl"))
        );
        assert_eq!(
            parse_location("file:///tmp/out.jsonl").unwrap(),
            Location::Local(PathBuf::from("/tmp/out.jsonl"))
        );
        assert!(matches!(
            parse_location("https://bucket.example/out.jsonl").unwrap(),
            Location::Http(_)
        ));
        assert!(parse_location("s3://bucket/out.jsonl").is_err());
    }

    #[test]
    fn test_join_location() {
        assert_eq!(join_location("file:///out/", "/job-1"), "file:///out/job-1");
    }

    #[test]
    fn test_read_json_lines_skips_blank_lines() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "{{\"id\": 1, \"pred\": \"a\"}}").unwrap();
        writeln!(file).unwrap();
        writeln!(file, "{{\"id\": 2, \"pred\": \"b\"}}").unwrap();

        let records = read_json_lines(file.path().to_str().unwrap()).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1]["pred"], "b");
    }

    #[test]
    fn test_read_json_lines_reports_bad_line() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "{{\"id\": 1}}").unwrap();
        writeln!(file, "not json").unwrap();

        let err = read_json_lines(file.path().to_str().unwrap()).unwrap_err();
        assert!(err.contains("line 2"));
    }
}
