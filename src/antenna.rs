//! Known antenna locations, one CSV record per line:
//! `name,lat,lon,height_m,acc_m`.

use std::fs;
use std::path::Path;

use thiserror::Error;

use crate::cli::FixedLocation;

pub const ANTENNA_FILE: &str = "Antennas.loc";

#[derive(Debug, Error)]
pub enum AntennaError {
    #[error("cannot read antenna locations from {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("malformed antenna record \"{0}\"")]
    Malformed(String),

    #[error("antenna \"{0}\" not found in {1}")]
    NotFound(String, String),
}

/// Resolves `name` to its surveyed location.
pub fn lookup(path: &Path, name: &str) -> Result<FixedLocation, AntennaError> {
    let contents = fs::read_to_string(path).map_err(|source| AntennaError::Io {
        path: path.display().to_string(),
        source,
    })?;

    for line in contents.lines() {
        let line = line.trim();

        if line.is_empty() {
            continue;
        }

        let fields: Vec<&str> = line.split(',').map(str::trim).collect();

        if fields[0] != name {
            continue;
        }

        if fields.len() != 5 {
            return Err(AntennaError::Malformed(line.to_string()));
        }

        let number = |field: &str| {
            field
                .parse::<f64>()
                .map_err(|_| AntennaError::Malformed(line.to_string()))
        };

        return Ok(FixedLocation {
            lat_deg: number(fields[1])?,
            lon_deg: number(fields[2])?,
            height_m: number(fields[3])?,
            accuracy_m: number(fields[4])?,
        });
    }

    Err(AntennaError::NotFound(
        name.to_string(),
        path.display().to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn antenna_file(contents: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!(
            "rtk-base-antennas-{}-{}.loc",
            std::process::id(),
            contents.len()
        ));
        fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn finds_named_antenna() {
        let path = antenna_file(
            "HP,49.634584546,8.631469629,148.6396,1.0\nRoof,48.1,11.5,520.0,2.5\n",
        );

        let location = lookup(&path, "Roof").unwrap();
        assert_eq!(location.lat_deg, 48.1);
        assert_eq!(location.lon_deg, 11.5);
        assert_eq!(location.height_m, 520.0);
        assert_eq!(location.accuracy_m, 2.5);

        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn unknown_name_is_an_error() {
        let path = antenna_file("HP,49.6,8.6,148.6,1.0\n");
        assert!(matches!(
            lookup(&path, "Garden"),
            Err(AntennaError::NotFound(..))
        ));
        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn truncated_record_is_an_error() {
        let path = antenna_file("HP,49.6,8.6\n");
        assert!(matches!(
            lookup(&path, "HP"),
            Err(AntennaError::Malformed(_))
        ));
        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn missing_file_is_an_error() {
        assert!(matches!(
            lookup(Path::new("/nonexistent/Antennas.loc"), "HP"),
            Err(AntennaError::Io { .. })
        ));
    }
}
