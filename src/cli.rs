use clap::{Arg, ArgMatches, ColorChoice, Command};

use std::path::PathBuf;

use thiserror::Error;

use crate::antenna::{self, AntennaError, ANTENNA_FILE};
use crate::controller::Mode;

const DEFAULT_POSITIONS_FILE: &str = "HP_Antenna_Cypress.csv";
const DEFAULT_ASSISTANCE_FILE: &str = "assistance_data.ubx";
const DEFAULT_TIMEDIFF_FILE: &str = "timedifference.txt";
const DEFAULT_SURVEY_IN: &str = "180,2.0";
const DEFAULT_LATENCY: &str = "0.093";

/// Survey-in target: observe for at least this long, down to this
/// accuracy.
#[derive(Debug, Clone, Copy)]
pub struct SurveyParams {
    pub min_duration_s: u32,
    pub accuracy_m: f64,
}

/// A surveyed antenna location, degrees / metres.
#[derive(Debug, Clone, Copy)]
pub struct FixedLocation {
    pub lat_deg: f64,
    pub lon_deg: f64,
    pub height_m: f64,
    pub accuracy_m: f64,
}

/// Everything decided at startup, shared read-only between the tasks.
#[derive(Debug, Clone)]
pub struct Config {
    pub mode: Mode,
    pub survey: SurveyParams,
    pub location: Option<FixedLocation>,
    pub positions_file: PathBuf,
    pub assistance_file: Option<PathBuf>,
    pub time_difference_file: Option<PathBuf>,

    /// Serial and pipeline delay folded into clock offset samples
    pub latency_s: f64,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid survey-in parameters \"{0}\", expected \"MIN_DUR,ACC_M\"")]
    InvalidSurveyIn(String),

    #[error("invalid location \"{0}\", expected \"lat,lon,height,acc\" or an antenna name")]
    InvalidLocation(String),

    #[error("invalid latency \"{0}\", expected seconds")]
    InvalidLatency(String),

    #[error(transparent)]
    Antenna(#[from] AntennaError),
}

pub struct Cli {
    /// Arguments passed by user
    matches: ArgMatches,
}

impl Cli {
    /// Build new command line interface
    pub fn new() -> Self {
        Self {
            matches: Self::command().get_matches(),
        }
    }

    fn command() -> Command {
        Command::new("rtk-base")
            .version(env!("CARGO_PKG_VERSION"))
            .about("U-Blox RTK base station controller and RTCM corrections broadcaster")
            .color(ColorChoice::Always)
            .arg(
                Arg::new("output_positions")
                    .short('o')
                    .long("output_positions")
                    .value_name("FILE")
                    .num_args(0..=1)
                    .default_missing_value(DEFAULT_POSITIONS_FILE)
                    .help("Log high precision positions to FILE instead of streaming corrections"),
            )
            .arg(
                Arg::new("assistance_file")
                    .short('a')
                    .long("assistance_file")
                    .value_name("FILE")
                    .num_args(0..=1)
                    .default_missing_value(DEFAULT_ASSISTANCE_FILE)
                    .help("Keep AssistNow ephemeris data updated in FILE. Requires a service token in ~/.keys/ublox_token.txt"),
            )
            .arg(
                Arg::new("time_difference")
                    .short('t')
                    .long("time_difference")
                    .value_name("FILE")
                    .num_args(0..=1)
                    .default_missing_value(DEFAULT_TIMEDIFF_FILE)
                    .help("Maintain the GNSS versus host clock offset estimate in FILE"),
            )
            .arg(
                Arg::new("survey_in")
                    .short('s')
                    .long("survey_in")
                    .value_name("MIN_DUR,ACC_M")
                    .default_value(DEFAULT_SURVEY_IN)
                    .help("Survey-in parameters: minimum duration [s] and target accuracy [m]"),
            )
            .arg(
                Arg::new("location")
                    .short('l')
                    .long("location")
                    .value_name("LOCATION")
                    .help("Fixed antenna location, either \"lat,lon,height,acc\" or a name resolved via Antennas.loc. Switches to fixed mode"),
            )
            .arg(
                Arg::new("latency")
                    .long("latency")
                    .value_name("SECONDS")
                    .default_value(DEFAULT_LATENCY)
                    .help("Receive path latency folded into clock offset samples"),
            )
    }

    #[cfg(test)]
    fn from_args<I, T>(args: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        Self {
            matches: Self::command().get_matches_from(args),
        }
    }

    /// Resolves the command line into the runtime [Config].
    pub fn config(&self) -> Result<Config, ConfigError> {
        let survey_spec = self.matches.get_one::<String>("survey_in").unwrap();
        let survey = parse_survey(survey_spec)?;

        let latency_spec = self.matches.get_one::<String>("latency").unwrap();
        let latency_s = latency_spec
            .parse::<f64>()
            .map_err(|_| ConfigError::InvalidLatency(latency_spec.to_string()))?;

        let location = match self.matches.get_one::<String>("location") {
            Some(spec) => Some(resolve_location(spec)?),
            None => None,
        };

        let positions = self.matches.get_one::<String>("output_positions");

        let mode = if location.is_some() {
            Mode::Fixed
        } else if positions.is_some() {
            Mode::OutputPositions
        } else {
            Mode::SurveyIn
        };

        Ok(Config {
            mode,
            survey,
            location,
            positions_file: positions
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_POSITIONS_FILE)),
            assistance_file: self
                .matches
                .get_one::<String>("assistance_file")
                .map(PathBuf::from),
            time_difference_file: self
                .matches
                .get_one::<String>("time_difference")
                .map(PathBuf::from),
            latency_s,
        })
    }
}

fn parse_survey(spec: &str) -> Result<SurveyParams, ConfigError> {
    let invalid = || ConfigError::InvalidSurveyIn(spec.to_string());

    let (duration, accuracy) = spec.split_once(',').ok_or_else(invalid)?;

    Ok(SurveyParams {
        min_duration_s: duration.trim().parse().map_err(|_| invalid())?,
        accuracy_m: accuracy.trim().parse().map_err(|_| invalid())?,
    })
}

/// Either four comma separated numbers, or a name looked up in the
/// antenna location file.
fn resolve_location(spec: &str) -> Result<FixedLocation, ConfigError> {
    let fields: Vec<&str> = spec.split(',').map(str::trim).collect();

    if fields.len() != 4 {
        return Ok(antenna::lookup(std::path::Path::new(ANTENNA_FILE), spec)?);
    }

    let invalid = || ConfigError::InvalidLocation(spec.to_string());

    Ok(FixedLocation {
        lat_deg: fields[0].parse().map_err(|_| invalid())?,
        lon_deg: fields[1].parse().map_err(|_| invalid())?,
        height_m: fields[2].parse().map_err(|_| invalid())?,
        accuracy_m: fields[3].parse().map_err(|_| invalid())?,
    })
}
