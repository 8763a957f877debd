//! Replays a recorded event log into [`SlamData`].
//!
//! One event per row, no header:
//!
//! ```text
//! observation,0,3,2.5,0.1,0.05,0.01
//! end_observation,0,
//! control,0,,1.0,0.0,0.0,0.01,0.01,0.005
//! ```
//!
//! `values` holds the mean followed by one standard deviation per component.

use std::io;
use std::path::Path;

use nalgebra::DVector;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SlamError};
use crate::slam::interfaces::{FeatureId, Timestep};
use crate::slam::slam_data::SlamData;
use crate::utils::mvn::MultivariateNormal;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Control,
    Observation,
    EndObservation,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct EventRecord {
    pub kind: EventKind,
    pub timestep: usize,
    pub feature: Option<usize>,
    pub values: Vec<f64>,
}

impl EventRecord {
    /// Gaussian described by `values`.
    pub fn distribution(&self) -> Option<MultivariateNormal> {
        let n = self.values.len();
        if n == 0 || n % 2 != 0 {
            return None;
        }
        let (mean, std_devs) = self.values.split_at(n / 2);
        Some(MultivariateNormal::from_std_devs(
            DVector::from_column_slice(mean),
            std_devs,
        ))
    }
}

fn csv_reader<R: io::Read>(reader: R) -> csv::Reader<R> {
    csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .comment(Some(b'#'))
        .from_reader(reader)
}

pub fn read_records<R: io::Read>(reader: R) -> Result<Vec<EventRecord>> {
    let records = csv_reader(reader)
        .deserialize()
        .collect::<std::result::Result<Vec<EventRecord>, csv::Error>>()?;
    Ok(records)
}

/// Feeds every record to `data`, returning the number of records applied.
pub fn replay<R: io::Read>(reader: R, data: &mut SlamData) -> Result<usize> {
    let mut count = 0;
    for (i, record) in csv_reader(reader).deserialize::<EventRecord>().enumerate() {
        apply(i, &record?, data)?;
        count += 1;
    }
    log::info!(
        "replayed {count} events up to timestep {}",
        data.current_timestep()
    );
    Ok(count)
}

pub fn replay_file<P: AsRef<Path>>(path: P, data: &mut SlamData) -> Result<usize> {
    let file = std::fs::File::open(path)?;
    replay(io::BufReader::new(file), data)
}

fn apply(index: usize, record: &EventRecord, data: &mut SlamData) -> Result<()> {
    let error = |message: String| SlamError::Replay {
        record: index,
        message,
    };

    let t = Timestep(record.timestep);
    if t != data.current_timestep() {
        return Err(error(format!(
            "timestep {t} does not match the log timestep {}",
            data.current_timestep()
        )));
    }

    match record.kind {
        EventKind::Control => {
            let control = record
                .distribution()
                .ok_or_else(|| error(format!("malformed control values {:?}", record.values)))?;
            data.add_control(control);
        }
        EventKind::Observation => {
            let id = record
                .feature
                .ok_or_else(|| error("observation without a feature id".to_owned()))?;
            let observation = record
                .distribution()
                .ok_or_else(|| error(format!("malformed observation values {:?}", record.values)))?;
            data.add_observation(FeatureId(id), observation);
        }
        EventKind::EndObservation => data.end_observation(),
    }
    Ok(())
}
