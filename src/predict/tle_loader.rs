use std::collections::HashMap;
use std::path::Path;

use sgp4::{Constants, Elements};

use super::error::PredictError;

pub struct TleEntry {
    pub name: Option<String>,
    pub norad_id: u32,
    pub source_file: String,
    pub elements: Elements,
    pub constants: Constants,
}

/// Element sets read from a directory of `.tle`/`.txt` files, indexed
/// by catalog number. Fetching fresh TLEs happens outside this process;
/// the directory is the hand-off point. When two files carry the same
/// satellite the later read wins.
pub struct TleCatalog {
    entries: HashMap<u32, TleEntry>,
}

impl TleCatalog {
    pub fn load(tle_dir: &Path) -> Result<Self, PredictError> {
        if !tle_dir.is_dir() {
            return Err(PredictError::DirectoryNotFound(
                tle_dir.display().to_string(),
            ));
        }

        let mut entries = HashMap::new();
        for dir_entry in std::fs::read_dir(tle_dir)? {
            let path = dir_entry?.path();
            let elements_file = path.is_file()
                && matches!(
                    path.extension().and_then(|e| e.to_str()),
                    Some("tle") | Some("txt")
                );
            if !elements_file {
                continue;
            }

            match parse_file(&path) {
                Ok(parsed) => {
                    for entry in parsed {
                        entries.insert(entry.norad_id, entry);
                    }
                }
                // One bad file must not take the whole catalog down.
                Err(e) => log::warn!("skipping TLE file {}: {}", path.display(), e),
            }
        }

        Ok(TleCatalog { entries })
    }

    pub fn lookup(&self, norad_id: u32) -> Option<&TleEntry> {
        self.entries.get(&norad_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn parse_file(path: &Path) -> Result<Vec<TleEntry>, PredictError> {
    let file_name = path
        .file_name()
        .unwrap_or_default()
        .to_string_lossy()
        .to_string();
    let content = std::fs::read_to_string(path)?;
    let invalid = |message: String| PredictError::InvalidTle {
        file: file_name.clone(),
        message,
    };

    let mut entries = Vec::new();
    for (name, line1, line2) in element_sets(&content) {
        let elements = Elements::from_tle(name, line1.as_bytes(), line2.as_bytes())
            .map_err(|e| invalid(e.to_string()))?;
        let constants =
            Constants::from_elements(&elements).map_err(|e| invalid(e.to_string()))?;
        entries.push(TleEntry {
            name: elements.object_name.clone(),
            norad_id: elements.norad_id as u32,
            source_file: file_name.clone(),
            elements,
            constants,
        });
    }
    Ok(entries)
}

/// Pair up the `1 `/`2 ` lines of a TLE file into element sets,
/// remembering at most one preceding name line for each. Stray lines
/// reset the pairing.
fn element_sets(content: &str) -> Vec<(Option<String>, String, String)> {
    let mut sets = Vec::new();
    let mut pending_name: Option<&str> = None;
    let mut pending_first: Option<&str> = None;

    for line in content.lines().map(str::trim).filter(|l| !l.is_empty()) {
        if line.starts_with("1 ") {
            pending_first = Some(line);
        } else if line.starts_with("2 ") {
            if let Some(first) = pending_first.take() {
                sets.push((
                    pending_name.take().map(String::from),
                    first.to_string(),
                    line.to_string(),
                ));
            }
            pending_name = None;
        } else {
            pending_name = Some(line);
            pending_first = None;
        }
    }

    sets
}
