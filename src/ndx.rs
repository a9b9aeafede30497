use anyhow::{Context, Result};
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;

/// Group names of a GROMACS index file, in file order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IndexFile {
    groups: Vec<String>,
}

impl IndexFile {
    pub fn read(path: &Path) -> Result<Self> {
        let file = File::open(path).context(format!("Reading {}", path.to_string_lossy()))?;
        Ok(Self::parse(BufReader::new(file).lines().map_while(io::Result::ok)))
    }

    pub fn parse<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let groups = lines
            .into_iter()
            .filter_map(|line| {
                line.as_ref()
                    .trim()
                    .strip_prefix('[')
                    .and_then(|s| s.strip_suffix(']'))
                    .map(|name| name.trim().to_string())
            })
            .collect();
        Self { groups }
    }

    pub fn groups(&self) -> &[String] {
        &self.groups
    }

    pub fn contains(&self, name: &str) -> bool {
        self.groups.iter().any(|group| group == name.trim())
    }

    /// First of `names` that is not a group of this file.
    pub fn find_missing<'a>(&self, names: impl IntoIterator<Item = &'a str>) -> Option<&'a str> {
        names.into_iter().find(|name| !self.contains(name))
    }
}
